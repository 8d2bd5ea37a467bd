//! Atlas bundle: the merged output of one analysis run
//!
//! `BundleBuilder` sequences the pipeline so that the `O(K²)` stages only
//! start once selection has reduced F columns to K rows. Row `i` of every
//! per-feature array in the bundle refers to the same feature.

use ndarray::Array2;
use serde::Serialize;
use tracing::info;

use crate::config::{AtlasConfig, ScorePolicy, SimilaritySpace, StabilitySplit};
use crate::descriptions::DescriptionLookup;
use crate::error::{ensure_dim, AtlasError, Result};
use crate::layout::{guardrail, project, Guardrail, LayoutMeta};
use crate::matrix::{ActivationTransform, AggregationMode, Pooling, RoleFeatureMatrix};
use crate::neighbors::NeighborGraph;
use crate::responses::ResponseCorpus;
use crate::scorer::{select_features, FeatureRecord, SelectionSummary};
use crate::similarity::role_similarity;
use crate::stability::split_half_stability;

/// Provenance and parameters of a bundle
#[derive(Debug, Clone, Serialize)]
pub struct DatasetMeta {
    pub name: String,
    pub pooling: Pooling,
    pub mode: AggregationMode,
    pub transform: ActivationTransform,
    pub n_roles: usize,
    pub n_features: usize,
    pub top_k: usize,
    pub score_policy: ScorePolicy,
    pub stability_split: StabilitySplit,
    pub stability_seed: u64,
    pub role_similarity_space: SimilaritySpace,
    pub layout: LayoutMeta,
    pub selection: SelectionSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct Coords {
    pub nonlinear: Vec<[f64; 2]>,
    pub linear: Vec<[f64; 2]>,
}

/// Interpretation aids for the linear map
#[derive(Debug, Clone, Serialize)]
pub struct LinearAxes {
    pub explained_variance_ratio: [f64; 2],
    /// Loading of each role (bundle role order) on the first axis
    pub pc1_role_loadings: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Bundle {
    pub dataset: DatasetMeta,
    pub guardrails: Guardrail,
    pub roles: Vec<String>,
    pub feature_ids: Vec<usize>,
    pub features: Vec<FeatureRecord>,
    pub coords: Coords,
    pub linear_axes: LinearAxes,
    pub neighbors: NeighborGraph,
    /// `[R, R]`, rows and columns in `roles` order
    pub role_similarity: Vec<Vec<f64>>,
}

impl Bundle {
    /// Check the row-alignment invariant across every per-feature and
    /// per-role array
    pub fn validate(&self) -> Result<()> {
        let k = self.features.len();
        let r = self.roles.len();
        ensure_dim("bundle feature ids", k, self.feature_ids.len())?;
        ensure_dim("bundle nonlinear coords", k, self.coords.nonlinear.len())?;
        ensure_dim("bundle linear coords", k, self.coords.linear.len())?;
        ensure_dim("bundle neighbor rows", k, self.neighbors.indices.len())?;
        ensure_dim("bundle neighbor similarity rows", k, self.neighbors.similarities.len())?;
        ensure_dim("bundle role similarity rows", r, self.role_similarity.len())?;
        ensure_dim("bundle pc1 loadings", r, self.linear_axes.pc1_role_loadings.len())?;
        for row in &self.role_similarity {
            ensure_dim("bundle role similarity columns", r, row.len())?;
        }

        for (i, record) in self.features.iter().enumerate() {
            if record.feature_row != i || record.feature_id != self.feature_ids[i] {
                return Err(AtlasError::InvalidInput(format!(
                    "feature row {i} is out of alignment"
                )));
            }
            ensure_dim("feature profile length", r, record.profile.len())?;
        }
        for (i, (indices, sims)) in self
            .neighbors
            .indices
            .iter()
            .zip(&self.neighbors.similarities)
            .enumerate()
        {
            ensure_dim("neighbor similarity count", indices.len(), sims.len())?;
            if indices.iter().any(|&j| j >= k || j == i) {
                return Err(AtlasError::InvalidInput(format!(
                    "neighbor list of row {i} references an invalid row"
                )));
            }
        }
        Ok(())
    }
}

/// Runs the atlas pipeline over one role matrix
#[derive(Debug, Clone)]
pub struct BundleBuilder<'a> {
    config: AtlasConfig,
    responses: Option<&'a ResponseCorpus>,
    descriptions: Option<&'a DescriptionLookup>,
}

impl<'a> BundleBuilder<'a> {
    pub fn new(config: AtlasConfig) -> Self {
        Self {
            config,
            responses: None,
            descriptions: None,
        }
    }

    /// Response-level data used for split-half stability
    pub fn with_responses(mut self, responses: &'a ResponseCorpus) -> Self {
        self.responses = Some(responses);
        self
    }

    pub fn with_descriptions(mut self, descriptions: &'a DescriptionLookup) -> Self {
        self.descriptions = Some(descriptions);
        self
    }

    pub fn config(&self) -> &AtlasConfig {
        &self.config
    }

    pub fn build(&self, matrix: &RoleFeatureMatrix) -> Result<Bundle> {
        let config = &self.config;
        config.validate()?;
        info!(
            "Building bundle '{}': {} roles x {} features",
            config.dataset_name,
            matrix.n_roles(),
            matrix.n_features()
        );

        info!("Step 1/6: split-half stability");
        let stability = match self.responses {
            Some(corpus) => Some(split_half_stability(
                corpus,
                matrix,
                config.stability_split,
                config.stability_seed,
            )?),
            None => {
                info!("No response-level data; stability fixed at 1.0");
                None
            }
        };

        info!("Step 2/6: scoring and selecting top {} features", config.top_k);
        let selection = select_features(matrix, stability.as_ref(), config, self.descriptions)?;
        if selection.is_empty() {
            return Err(AtlasError::InvalidInput(
                "no feature passed the selection filters".into(),
            ));
        }

        info!("Step 3/6: cosine neighbors (k = {})", config.neighbor_k);
        let neighbors = NeighborGraph::build(selection.profiles.view(), config.neighbor_k);

        info!("Step 4/6: 2D layouts");
        let layout = project(selection.profiles.view(), &config.layout)?;
        let guardrails = guardrail(&neighbors, &layout);

        info!("Step 5/6: role similarity ({:?})", config.role_similarity_space);
        let feature_ids = selection.feature_ids();
        let similarity = match config.role_similarity_space {
            SimilaritySpace::AllFeatures => role_similarity(matrix.values().view()),
            SimilaritySpace::SelectedFeatures => {
                role_similarity(matrix.select_features(&feature_ids).view())
            }
        };

        info!("Step 6/6: assembling bundle");
        let to_pairs = |coords: &Array2<f64>| -> Vec<[f64; 2]> {
            coords.rows().into_iter().map(|r| [r[0], r[1]]).collect()
        };
        let bundle = Bundle {
            dataset: DatasetMeta {
                name: config.dataset_name.clone(),
                pooling: matrix.pooling(),
                mode: matrix.mode(),
                transform: matrix.options().transform,
                n_roles: matrix.n_roles(),
                n_features: matrix.n_features(),
                top_k: config.top_k,
                score_policy: config.score_policy,
                stability_split: config.stability_split,
                stability_seed: config.stability_seed,
                role_similarity_space: config.role_similarity_space,
                layout: layout.meta.clone(),
                selection: selection.summary.clone(),
            },
            guardrails,
            roles: matrix.roles().to_vec(),
            feature_ids,
            coords: Coords {
                nonlinear: to_pairs(&layout.nonlinear),
                linear: to_pairs(&layout.linear.coords),
            },
            linear_axes: LinearAxes {
                explained_variance_ratio: layout.linear.explained_variance_ratio,
                pc1_role_loadings: layout.linear.pc1_role_loadings.clone(),
            },
            neighbors,
            role_similarity: similarity.rows().into_iter().map(|r| r.to_vec()).collect(),
            features: selection.records,
        };
        bundle.validate()?;
        Ok(bundle)
    }
}
