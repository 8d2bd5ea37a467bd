// Pedantic clippy configuration for numerical analysis code
#![allow(clippy::cast_precision_loss)] // usize→f64 intentional in statistics
#![allow(clippy::cast_possible_truncation)] // f64→usize after trunc
#![allow(clippy::many_single_char_names)] // x, y, i, j standard in math
#![allow(clippy::similar_names)] // related variables like `prev`/`now`
#![allow(clippy::module_name_repetitions)] // AtlasConfig in config.rs is fine
// Documentation pedantic - acceptable for research code:
#![allow(clippy::doc_markdown)] // backticks for every technical term is excessive
#![allow(clippy::missing_errors_doc)] // # Errors section for every Result fn
#![allow(clippy::missing_panics_doc)] // # Panics section for every panic
// Method style pedantic:
#![allow(clippy::must_use_candidate)] // #[must_use] on every pure fn is excessive
#![allow(clippy::return_self_not_must_use)] // #[must_use] on Self returns
#![allow(clippy::needless_pass_by_value)] // value params for API flexibility
#![allow(clippy::cast_sign_loss)] // f64→usize when value is known positive
#![allow(clippy::float_cmp)] // exact zero checks are deliberate

//! persona-atlas: persona feature atlas and assistant-axis drift
//!
//! Turns sparse-autoencoder feature activations pooled per role into a
//! browsable atlas of persona-discriminative features, and attributes
//! movement along an assistant/persona axis within a conversation to
//! individual features and tokens.
//!
//! ## Architecture
//!
//! - `responses`: Per-role response activations and split-half draws
//! - `matrix`: RoleFeatureMatrix with pooling, transform and question-centering
//! - `stability`: Split-half stability of feature role profiles
//! - `scorer`: Cross-role feature statistics and top-K selection
//! - `neighbors`: Exact cosine kNN graph over selected features
//! - `projection`: Linear (principal component) 2D projection
//! - `embedding`: Neighbor-preserving nonlinear 2D embedding
//! - `layout`: Both projections plus the neighborhood-preservation guardrail
//! - `similarity`: Role × role cosine similarity
//! - `axis`: Assistant axis derivation
//! - `trace`: Conversation traces (per-turn and per-token activations)
//! - `drift`: Turn scoring, transition attribution, token localization
//! - `descriptions`: Optional feature description lookup
//! - `bundle`: Pipeline orchestration and the bundle aggregate
//! - `export`: JSON and CSV writers

pub mod axis;
pub mod bundle;
pub mod config;
pub mod descriptions;
pub mod drift;
pub mod embedding;
pub mod error;
pub mod export;
pub mod layout;
pub mod matrix;
pub mod neighbors;
pub mod numeric;
pub mod projection;
pub mod responses;
pub mod scorer;
pub mod similarity;
pub mod stability;
pub mod trace;

pub use axis::{AssistantAxis, AxisMetadata};
pub use bundle::{Bundle, BundleBuilder, Coords, DatasetMeta, LinearAxes};
pub use config::{
    AtlasConfig, Dispersion, DriftConfig, LayoutConfig, NeighborPolicy, ScorePolicy,
    SimilaritySpace, StabilitySplit, TokenNormalization,
};
pub use descriptions::{DescriptionLookup, FeatureDescription};
pub use drift::{
    normalize_token_values, DriftReport, DriftScorer, Effect, FeatureDelta, TokenLocalization,
    Transition, TurnScore,
};
pub use error::{AtlasError, Result};
pub use export::{write_bundle_json, write_feature_csv, write_feature_table, write_json};
pub use layout::{neighborhood_preservation, Guardrail, Layout, LayoutMeta};
pub use matrix::{ActivationTransform, AggregationMode, MatrixOptions, Pooling, RoleFeatureMatrix};
pub use neighbors::NeighborGraph;
pub use projection::{pca_2d, LinearProjection};
pub use responses::{ResponseCorpus, ResponseRecord, RoleResponses};
pub use scorer::{select_features, FeatureRecord, FeatureStats, RoleShare, Selection, SelectionSummary};
pub use similarity::role_similarity;
pub use stability::split_half_stability;
pub use trace::{ConversationTrace, TokenActivations, TurnActivations};
