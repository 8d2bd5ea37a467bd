//! Integration tests for persona-atlas
//!
//! Inputs are written to temporary JSON files and driven through the public
//! API the way the CLI uses it.

use persona_atlas::{
    write_bundle_json, write_feature_csv, AggregationMode, AssistantAxis, AtlasConfig, AtlasError,
    BundleBuilder, ConversationTrace, DescriptionLookup, DriftConfig, DriftScorer, Effect,
    LayoutConfig, MatrixOptions, Pooling, ResponseCorpus, RoleFeatureMatrix, StabilitySplit,
    TurnActivations,
};
use serde_json::{json, Value};
use std::io::Write;
use tempfile::NamedTempFile;

const N_FEATURES: usize = 12;
const ROLES: [&str; 4] = ["assistant", "pirate", "poet", "detective"];

fn write_temp(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

/// Four roles, six responses each over three questions and two variants.
/// Feature `j < 10` is strong for role `j % 4`; features 10 and 11 never fire.
fn synthetic_responses() -> Value {
    let roles: Vec<Value> = ROLES
        .iter()
        .enumerate()
        .map(|(r, role)| {
            let responses: Vec<Value> = (0..6)
                .map(|n| {
                    let activations: Vec<f64> = (0..N_FEATURES)
                        .map(|j| {
                            if j >= 10 {
                                0.0
                            } else if j % 4 == r {
                                2.0 + 0.1 * (n % 3) as f64
                            } else {
                                0.1 * ((r + n + j) % 3) as f64
                            }
                        })
                        .collect();
                    json!({
                        "question_id": n % 3,
                        "variant_id": n / 3,
                        "activations": activations,
                    })
                })
                .collect();
            json!({"role": role, "responses": responses})
        })
        .collect();
    json!({"roles": roles, "metadata": {"source": "synthetic"}})
}

fn small_config() -> AtlasConfig {
    AtlasConfig {
        dataset_name: "synthetic".into(),
        top_k: 6,
        neighbor_k: 3,
        layout: LayoutConfig {
            n_neighbors: 4,
            n_epochs: 40,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Test response corpus loading from JSON
#[test]
fn test_response_corpus_loading() {
    let file = write_temp(
        r#"{
        "roles": [
            {"role": "assistant", "responses": [
                {"question_id": 0, "activations": [1.0, 0.0]},
                {"question_id": 1, "activations": [0.5, 0.5]}
            ]},
            {"role": "pirate", "responses": [
                {"question_id": 0, "activations": [0.0, 2.0]}
            ]}
        ]
    }"#,
    );

    let corpus = ResponseCorpus::load(file.path()).unwrap();
    assert_eq!(corpus.len(), 2);
    assert_eq!(corpus.n_features(), 2);
    assert_eq!(corpus.get("assistant").unwrap().n_responses(), 2);
    assert!(corpus.get("wizard").is_none());
}

/// Test the full bundle pipeline from response-level data to written exports
#[test]
fn test_bundle_end_to_end() {
    let responses = write_temp(&synthetic_responses().to_string());
    let descriptions = write_temp(
        r#"[{"feature_id": 0, "description": "helpful framing", "url": "https://example.org/0"}]"#,
    );

    let corpus = ResponseCorpus::load(responses.path()).unwrap();
    let matrix = RoleFeatureMatrix::from_responses(&corpus, MatrixOptions::default()).unwrap();
    let lookup = DescriptionLookup::load(descriptions.path()).unwrap();

    let bundle = BundleBuilder::new(small_config())
        .with_responses(&corpus)
        .with_descriptions(&lookup)
        .build(&matrix)
        .unwrap();

    let k = bundle.features.len();
    assert!((4..=6).contains(&k));
    assert_eq!(bundle.coords.nonlinear.len(), k);
    assert_eq!(bundle.coords.linear.len(), k);
    assert_eq!(bundle.neighbors.indices.len(), k);
    assert_eq!(bundle.roles, ROLES.map(String::from).to_vec());
    assert_eq!(bundle.dataset.selection.stability_source, "split_half");
    assert!(bundle.feature_ids.iter().all(|&id| id < 10));
    for i in 0..4 {
        assert_eq!(bundle.role_similarity[i][i], 1.0);
    }

    // Role-specific features prefer the role they were planted in
    for record in &bundle.features {
        assert_eq!(record.preferred_role_idx, record.feature_id % 4);
    }
    if let Some(record) = bundle.features.iter().find(|r| r.feature_id == 0) {
        let description = record.description.as_ref().unwrap();
        assert_eq!(description.description.as_deref(), Some("helpful framing"));
    }

    let dir = tempfile::tempdir().unwrap();
    let bundle_path = dir.path().join("bundle.json");
    let csv_path = dir.path().join("features.csv");
    write_bundle_json(&bundle, &bundle_path).unwrap();
    write_feature_csv(&bundle.features, &csv_path).unwrap();

    let written: Value =
        serde_json::from_str(&std::fs::read_to_string(&bundle_path).unwrap()).unwrap();
    assert_eq!(written["feature_ids"].as_array().unwrap().len(), k);
    assert_eq!(written["coords"]["nonlinear"].as_array().unwrap().len(), k);
    assert_eq!(written["guardrails"]["k"], json!(3));
    let csv_text = std::fs::read_to_string(&csv_path).unwrap();
    assert_eq!(csv_text.lines().count(), k + 1);
}

/// Test question-centered aggregation and variant-group stability
#[test]
fn test_question_centered_bundle() {
    let responses = write_temp(&synthetic_responses().to_string());
    let corpus = ResponseCorpus::load(responses.path()).unwrap();
    let options = MatrixOptions {
        mode: AggregationMode::QuestionCentered,
        ..Default::default()
    };
    let matrix = RoleFeatureMatrix::from_responses(&corpus, options).unwrap();

    // Residuals of each feature sum to zero across roles
    for j in 0..N_FEATURES {
        let total: f64 = matrix.values().column(j).sum();
        assert!(total.abs() < 1e-9);
    }

    let config = AtlasConfig {
        stability_split: StabilitySplit::VariantGroups,
        ..small_config()
    };
    let bundle = BundleBuilder::new(config)
        .with_responses(&corpus)
        .build(&matrix)
        .unwrap();
    assert!(bundle.validate().is_ok());
    assert_eq!(bundle.dataset.mode, AggregationMode::QuestionCentered);
}

/// Test drift analysis over files, two-role scenario
#[test]
fn test_drift_end_to_end() {
    let matrix_file = write_temp(
        r#"{"roles": ["assistant", "pirate"], "pooling": "mean",
            "features": [[1.0, 0.0], [0.0, 1.0]]}"#,
    );
    let trace_file = write_temp(
        r#"{"conversation_id": "voyage", "turns": [
            {"turn": 0, "activations": [0.0, 1.0]},
            {"turn": 1, "activations": [1.0, 0.0],
             "tokens": {"tokens": ["Of", "course"], "activations": [[0.5, 0.0], [1.0, 0.0]]}}
        ]}"#,
    );

    let matrix = RoleFeatureMatrix::load(matrix_file.path()).unwrap();
    let axis = AssistantAxis::derive(&matrix, "assistant").unwrap();
    let trace = ConversationTrace::load(trace_file.path()).unwrap();
    let scorer = DriftScorer::new(&axis, DriftConfig::default());
    let report = scorer.analyze(&trace).unwrap();

    assert_eq!(report.conversation_id.as_deref(), Some("voyage"));
    assert!((report.turn_scores[0].score + 0.7071).abs() < 1e-4);
    assert!((report.turn_scores[1].score - 0.7071).abs() < 1e-4);

    let transition = &report.transitions[0];
    assert_eq!(transition.activated[0].effect, Effect::TowardAssistant);
    assert_eq!(transition.deactivated[0].effect, Effect::TowardAssistant);
    assert!((transition.delta_score - 1.4142).abs() < 1e-4);

    let tokens = &report.token_localization[0];
    assert_eq!(tokens.turn, 1);
    assert!((tokens.normalized_values[0] - 0.5).abs() < 1e-12);
    assert!((tokens.normalized_values[1] - 1.0).abs() < 1e-12);

    let out = tempfile::tempdir().unwrap();
    persona_atlas::write_json(&report, out.path().join("drift.json")).unwrap();
    let written: Value = serde_json::from_str(
        &std::fs::read_to_string(out.path().join("drift.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(
        written["transitions"][0]["activated"][0]["effect"],
        json!("toward_assistant")
    );
}

/// Test drift against a log1p-transformed matrix scores raw turns in the
/// same space as the axis
#[test]
fn test_drift_on_transformed_matrix() {
    let responses = write_temp(&synthetic_responses().to_string());
    let corpus = ResponseCorpus::load(responses.path()).unwrap();
    let matrix = RoleFeatureMatrix::from_responses(&corpus, MatrixOptions::default()).unwrap();
    let axis = AssistantAxis::derive(&matrix, "assistant").unwrap();

    let pooled = |role: &str| corpus.get(role).unwrap().pooled(Pooling::Mean);
    let trace = ConversationTrace::new(
        Some("roleplay".into()),
        vec![
            TurnActivations::new(0, pooled("pirate")),
            TurnActivations::new(1, pooled("poet")),
            TurnActivations::new(2, pooled("assistant")),
        ],
    )
    .unwrap();
    let report = DriftScorer::new(&axis, DriftConfig::default())
        .analyze(&trace)
        .unwrap();

    let scores: Vec<f64> = report.turn_scores.iter().map(|s| s.score).collect();
    assert!(scores[2] > scores[0]);
    assert!(scores[2] > scores[1]);
    assert!(report.transitions[1].delta_score > 0.0);

    // Assistant row minus contrast centroid projects to the raw axis norm
    let centroid = (pooled("pirate") + pooled("poet") + pooled("detective")) / 3.0;
    let gap = scores[2] - axis.project(centroid.view()).unwrap();
    assert!((gap - axis.metadata().raw_norm).abs() < 1e-9);
}

/// Test fail-fast behaviour for missing roles and mismatched widths
#[test]
fn test_drift_rejects_bad_inputs() {
    let matrix_file = write_temp(r#"{"roles": ["pirate", "poet"], "features": [[1.0], [0.0]]}"#);
    let matrix = RoleFeatureMatrix::load(matrix_file.path()).unwrap();
    assert!(matches!(
        AssistantAxis::derive(&matrix, "assistant"),
        Err(AtlasError::MissingRole(_))
    ));

    let axis = AssistantAxis::derive(&matrix, "pirate").unwrap();
    let trace = ConversationTrace::from_json_str(
        r#"{"turns": [{"turn": 0, "activations": [1.0, 2.0]}]}"#,
    )
    .unwrap();
    let scorer = DriftScorer::new(&axis, DriftConfig::default());
    assert!(matches!(
        scorer.analyze(&trace),
        Err(AtlasError::ShapeMismatch { .. })
    ));
}

/// Test config loading keeps defaults for absent fields
#[test]
fn test_config_file_defaults() {
    let file = write_temp(r#"{"top_k": 50, "layout": {"random_seed": 7}}"#);
    let config = AtlasConfig::load(file.path()).unwrap();
    assert_eq!(config.top_k, 50);
    assert_eq!(config.neighbor_k, 10);
    assert_eq!(config.layout.random_seed, 7);
    assert_eq!(config.layout.n_neighbors, 15);

    let bad = write_temp(r#"{"top_k": 0}"#);
    assert!(matches!(
        AtlasConfig::load(bad.path()),
        Err(AtlasError::InvalidConfig(_))
    ));

    let drift = DriftConfig::default();
    assert_eq!(drift.top_n, 10);
}
