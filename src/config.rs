//! Configuration for bundle building and drift analysis
//!
//! All structs deserialize from JSON with per-field defaults, so a config
//! file only needs to name the values it overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AtlasError, Result};

/// Dispersion statistic fed into the ranking score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dispersion {
    /// Population standard deviation across roles
    Sd,
    /// Coefficient of variation `sd / max(mu, ε)`
    Cv,
}

/// Ranking policy combining dispersion and stability into one score.
///
/// Every variant is monotonically non-decreasing in the dispersion statistic
/// for non-negative stability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScorePolicy {
    /// `stability × dispersion`
    Product { dispersion: Dispersion },
    /// `(1 - w) × dispersion + w × stability`
    WeightedSum {
        dispersion: Dispersion,
        stability_weight: f64,
    },
    /// Dispersion alone; stability is reported but ignored for ranking
    DispersionOnly { dispersion: Dispersion },
}

impl Default for ScorePolicy {
    fn default() -> Self {
        Self::Product {
            dispersion: Dispersion::Sd,
        }
    }
}

impl ScorePolicy {
    /// Combine a feature's statistics into its ranking score
    pub fn score(&self, sd: f64, cv: f64, stability: f64) -> f64 {
        let pick = |d: Dispersion| match d {
            Dispersion::Sd => sd,
            Dispersion::Cv => cv,
        };
        match *self {
            Self::Product { dispersion } => stability * pick(dispersion),
            Self::WeightedSum {
                dispersion,
                stability_weight,
            } => (1.0 - stability_weight) * pick(dispersion) + stability_weight * stability,
            Self::DispersionOnly { dispersion } => pick(dispersion),
        }
    }

    fn validate(&self) -> Result<()> {
        if let Self::WeightedSum {
            stability_weight, ..
        } = self
        {
            if !(0.0..=1.0).contains(stability_weight) {
                return Err(AtlasError::InvalidConfig(format!(
                    "stability_weight must be in [0, 1]: {stability_weight}"
                )));
            }
        }
        Ok(())
    }
}

/// How responses are divided for split-half stability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StabilitySplit {
    /// Seeded random permutation split at `n / 2`
    RandomHalves,
    /// Alternate instruction-variant ids between the two halves
    VariantGroups,
}

/// Which feature columns the role similarity matrix is computed over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilaritySpace {
    AllFeatures,
    SelectedFeatures,
}

/// Behaviour when the nonlinear layout has fewer samples than `n_neighbors`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeighborPolicy {
    /// Clamp to the sample count and record it
    Clamp,
    /// Fail with the minimum sample count required
    Fail,
}

/// Parameters of the 2D projections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Neighborhood size of the nonlinear embedding (self included)
    pub n_neighbors: usize,
    /// Minimum spacing of embedded points
    pub min_dist: f64,
    /// Optimization epochs
    pub n_epochs: usize,
    /// Negative samples per positive edge update
    pub negative_samples: usize,
    /// Seed for both projections
    pub random_seed: u64,
    pub neighbor_policy: NeighborPolicy,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            n_neighbors: 15,
            min_dist: 0.1,
            n_epochs: 200,
            negative_samples: 5,
            random_seed: 42,
            neighbor_policy: NeighborPolicy::Clamp,
        }
    }
}

impl LayoutConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_neighbors < 2 {
            return Err(AtlasError::InvalidConfig(format!(
                "n_neighbors must be >= 2: {}",
                self.n_neighbors
            )));
        }
        if !(self.min_dist >= 0.0 && self.min_dist.is_finite()) {
            return Err(AtlasError::InvalidConfig(format!(
                "min_dist must be finite and >= 0: {}",
                self.min_dist
            )));
        }
        if self.n_epochs == 0 {
            return Err(AtlasError::InvalidConfig("n_epochs must be positive".into()));
        }
        Ok(())
    }
}

/// Configuration for one atlas bundle build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasConfig {
    /// Dataset label recorded in the bundle
    pub dataset_name: String,
    /// Number of features to select
    pub top_k: usize,
    /// Neighbor count for the high-D graph and the layout guardrail
    pub neighbor_k: usize,
    /// Number of top roles reported per feature
    pub top_roles: usize,
    /// A role counts as active for a feature when its value exceeds this
    pub activation_threshold: f64,
    /// Require `sd >= median(sd of alive features)` for eligibility
    pub median_sd_filter: bool,
    pub score_policy: ScorePolicy,
    pub stability_split: StabilitySplit,
    pub stability_seed: u64,
    pub role_similarity_space: SimilaritySpace,
    pub layout: LayoutConfig,
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            dataset_name: "personas".to_string(),
            top_k: 500,
            neighbor_k: 10,
            top_roles: 3,
            activation_threshold: 0.0,
            median_sd_filter: true,
            score_policy: ScorePolicy::default(),
            stability_split: StabilitySplit::RandomHalves,
            stability_seed: 42,
            role_similarity_space: SimilaritySpace::SelectedFeatures,
            layout: LayoutConfig::default(),
        }
    }
}

impl AtlasConfig {
    /// Load from a JSON file; absent fields keep their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(AtlasError::InvalidConfig("top_k must be positive".into()));
        }
        if self.neighbor_k == 0 {
            return Err(AtlasError::InvalidConfig("neighbor_k must be positive".into()));
        }
        if !self.activation_threshold.is_finite() {
            return Err(AtlasError::InvalidConfig(
                "activation_threshold must be finite".into(),
            ));
        }
        self.score_policy.validate()?;
        self.layout.validate()
    }
}

/// Range used when normalizing per-token axis projections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenNormalization {
    /// Divide by the turn's max |value|, giving `[-1, 1]` with sign kept
    SignedMaxAbs,
    /// Min-max scale within the turn to `[0, 1]`
    MinMax,
}

/// Configuration for drift analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Features retained per direction in each transition
    pub top_n: usize,
    pub token_normalization: TokenNormalization,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            top_n: 10,
            token_normalization: TokenNormalization::SignedMaxAbs,
        }
    }
}

impl DriftConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.top_n == 0 {
            return Err(AtlasError::InvalidConfig("top_n must be positive".into()));
        }
        Ok(())
    }
}
