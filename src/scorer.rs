//! Feature Scorer & Selector
//!
//! Cross-role statistics are computed for every feature column (cheap,
//! `O(R·F)`), a basic variance filter and the configured score policy pick
//! the top-K features, and only those K get the full per-feature record.
//! Everything downstream (neighbors, layouts) consumes the `[K, R]`
//! selection, never the F-wide matrix.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::AtlasConfig;
use crate::descriptions::{DescriptionLookup, FeatureDescription};
use crate::error::{AtlasError, Result};
use crate::matrix::RoleFeatureMatrix;
use crate::numeric::{argmax, by_value_desc, descending_indices, median, shannon_entropy, EPSILON};

/// Scoring statistics of one feature's role profile
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureStats {
    /// Mean across roles
    pub mu: f64,
    /// Population standard deviation across roles
    pub sd: f64,
    /// `sd / max(mu, ε)`
    pub cv: f64,
    /// Fraction of roles above the activation threshold
    pub active_frac: f64,
    /// Largest over second-largest role value
    pub pref_ratio: f64,
    /// Entropy (nats) of the normalized profile
    pub bridge_entropy: f64,
    pub stability: f64,
    pub score: f64,
    /// Mean of the untransformed pooled activations
    pub mean_activation: f64,
    /// Max of the untransformed pooled activations
    pub max_activation: f64,
}

/// One role's share of a feature's total activation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoleShare {
    pub role_idx: usize,
    pub role: String,
    pub activation: f64,
    pub share: f64,
}

/// A selected feature
#[derive(Debug, Clone, Serialize)]
pub struct FeatureRecord {
    /// Row position in the selection order
    pub feature_row: usize,
    /// Column index in the role matrix
    pub feature_id: usize,
    /// Analysis values across roles `[R]`
    pub profile: Vec<f64>,
    pub preferred_role_idx: usize,
    pub preferred_role: String,
    pub top_roles: Vec<RoleShare>,
    pub stats: FeatureStats,
    pub description: Option<FeatureDescription>,
}

/// Counts produced by the filter stages
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionSummary {
    pub n_features: usize,
    /// Untransformed cross-role mean > 0
    pub alive_count: usize,
    /// Alive and above the sd threshold (when the filter is on)
    pub pass_basic_count: usize,
    /// Passed every filter with a finite score
    pub eligible_count: usize,
    pub sd_threshold: f64,
    pub selected_count: usize,
    /// `"split_half"` or `"none"`
    pub stability_source: String,
}

/// Result of top-K selection
#[derive(Debug, Clone)]
pub struct Selection {
    pub records: Vec<FeatureRecord>,
    /// Selected role profiles `[K, R]`, row `i` = `records[i]`
    pub profiles: Array2<f64>,
    pub summary: SelectionSummary,
}

impl Selection {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn feature_ids(&self) -> Vec<usize> {
        self.records.iter().map(|r| r.feature_id).collect()
    }
}

/// Statistics of a single profile.
///
/// `profile` holds analysis values, `raw` the untransformed pooled values of
/// the same column.
pub fn feature_stats(
    profile: ArrayView1<'_, f64>,
    raw: ArrayView1<'_, f64>,
    stability: f64,
    config: &AtlasConfig,
) -> FeatureStats {
    let n_roles = profile.len();
    let mu = profile.mean().unwrap_or(0.0);
    let sd = profile.std(0.0);
    let cv = sd / mu.max(EPSILON);

    let active = profile
        .iter()
        .filter(|&&v| v > config.activation_threshold)
        .count();
    let active_frac = if n_roles == 0 {
        0.0
    } else {
        active as f64 / n_roles as f64
    };

    let mut sorted = profile.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let top1 = sorted.first().copied().unwrap_or(0.0);
    let top2 = sorted.get(1).copied().unwrap_or(0.0);
    let pref_ratio = top1 / top2.max(EPSILON);

    FeatureStats {
        mu,
        sd,
        cv,
        active_frac,
        pref_ratio,
        bridge_entropy: shannon_entropy(profile),
        stability,
        score: config.score_policy.score(sd, cv, stability),
        mean_activation: raw.mean().unwrap_or(0.0),
        max_activation: raw.fold(f64::NEG_INFINITY, |m, &v| m.max(v)),
    }
}

/// Top-`n` roles of a profile with their shares of the profile total
pub fn top_role_shares(profile: ArrayView1<'_, f64>, roles: &[String], n: usize) -> Vec<RoleShare> {
    let total = profile.sum();
    descending_indices(profile)
        .into_iter()
        .take(n)
        .map(|role_idx| {
            let activation = profile[role_idx];
            RoleShare {
                role_idx,
                role: roles[role_idx].clone(),
                activation,
                share: if total > 0.0 { activation / total } else { 0.0 },
            }
        })
        .collect()
}

/// Rank features and build records for the top `config.top_k`.
///
/// `stability` is indexed by feature id; `None` means no response-level
/// data, in which case every feature gets the neutral stability 1.0.
/// Returns fewer than `top_k` records when fewer features are eligible.
pub fn select_features(
    matrix: &RoleFeatureMatrix,
    stability: Option<&Array1<f64>>,
    config: &AtlasConfig,
    descriptions: Option<&DescriptionLookup>,
) -> Result<Selection> {
    config.validate()?;
    let n_features = matrix.n_features();
    if let Some(s) = stability {
        matrix.ensure_width("stability length", s.len())?;
    }
    let stability_at = |j: usize| stability.map_or(1.0, |s| s[j]);

    let values = matrix.values();
    let raw = matrix.raw();
    let mu = values
        .mean_axis(Axis(0))
        .ok_or_else(|| AtlasError::InvalidInput("role matrix has no rows".into()))?;
    let sd = values.std_axis(Axis(0), 0.0);
    let raw_mu = raw
        .mean_axis(Axis(0))
        .ok_or_else(|| AtlasError::InvalidInput("role matrix has no rows".into()))?;

    info!("Step 1/3: basic variance filter over {} features", n_features);
    let alive: Vec<bool> = raw_mu.iter().map(|&m| m > 0.0).collect();
    let alive_sd: Vec<f64> = (0..n_features).filter(|&j| alive[j]).map(|j| sd[j]).collect();
    let sd_threshold = if config.median_sd_filter {
        median(&alive_sd).unwrap_or(0.0)
    } else {
        0.0
    };
    let pass_basic: Vec<bool> = (0..n_features)
        .map(|j| alive[j] && sd[j] >= sd_threshold)
        .collect();
    let alive_count = alive.iter().filter(|&&a| a).count();
    let pass_basic_count = pass_basic.iter().filter(|&&p| p).count();
    info!(
        "Basic filter retained {}/{} features (alive {}, sd threshold {:.6})",
        pass_basic_count, n_features, alive_count, sd_threshold
    );

    info!("Step 2/3: ranking by {:?}", config.score_policy);
    let mut ranked: Vec<(usize, f64)> = (0..n_features)
        .filter(|&j| pass_basic[j])
        .filter(|&j| values.column(j).iter().any(|&v| v != 0.0))
        .filter_map(|j| {
            let cv = sd[j] / mu[j].max(EPSILON);
            let score = config.score_policy.score(sd[j], cv, stability_at(j));
            score.is_finite().then_some((j, score))
        })
        .collect();
    let eligible_count = ranked.len();
    ranked.sort_by(by_value_desc);
    ranked.truncate(config.top_k);
    if ranked.len() < config.top_k {
        warn!(
            "Only {} eligible features for top_k = {}",
            ranked.len(),
            config.top_k
        );
    }

    info!("Step 3/3: building {} feature records", ranked.len());
    let selected: Vec<usize> = ranked.iter().map(|&(j, _)| j).collect();
    let roles = matrix.roles();
    let records: Vec<FeatureRecord> = selected
        .par_iter()
        .enumerate()
        .map(|(feature_row, &feature_id)| {
            let profile = values.column(feature_id);
            let stats = feature_stats(
                profile,
                raw.column(feature_id),
                stability_at(feature_id),
                config,
            );
            let preferred_role_idx = argmax(profile).unwrap_or(0);
            FeatureRecord {
                feature_row,
                feature_id,
                profile: profile.to_vec(),
                preferred_role_idx,
                preferred_role: roles[preferred_role_idx].clone(),
                top_roles: top_role_shares(profile, roles, config.top_roles),
                stats,
                description: descriptions
                    .and_then(|d| d.get(feature_id))
                    .filter(|d| !d.is_empty())
                    .cloned(),
            }
        })
        .collect();

    let profiles = matrix
        .select_features(&selected)
        .t()
        .as_standard_layout()
        .into_owned();
    debug!("Selected profile matrix shape {:?}", profiles.shape());

    let summary = SelectionSummary {
        n_features,
        alive_count,
        pass_basic_count,
        eligible_count,
        sd_threshold,
        selected_count: records.len(),
        stability_source: if stability.is_some() {
            "split_half".to_string()
        } else {
            "none".to_string()
        },
    };

    Ok(Selection {
        records,
        profiles,
        summary,
    })
}
