//! Layout Projector: nonlinear + linear 2D maps and the trust guardrail
//!
//! The guardrail measures how many of each feature's full-space cosine
//! neighbors survive as Euclidean neighbors on the nonlinear map. It ships
//! with the bundle so consumers know how far on-screen proximity can be
//! trusted; related-feature answers always come from the neighbor graph.

use std::collections::HashSet;

use ndarray::{Array2, ArrayView2};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{LayoutConfig, NeighborPolicy};
use crate::embedding::{embed, EmbeddingParams};
use crate::error::{AtlasError, Result};
use crate::neighbors::NeighborGraph;
use crate::numeric::by_value_desc;
use crate::projection::{pca_2d, LinearProjection};

/// Fewest samples the nonlinear layout accepts
pub const MIN_LAYOUT_SAMPLES: usize = 2;

pub const GUARDRAIL_NOTE: &str = "Use the map for navigation only. Related features and role \
similarity come from high-dimensional cosine space, not on-screen distance.";

/// Parameters actually used for a layout run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutMeta {
    pub seed: u64,
    pub n_neighbors_requested: usize,
    pub n_neighbors_effective: usize,
    /// `n_neighbors` was reduced to the sample count
    pub clamped: bool,
    pub min_dist: f64,
    pub n_epochs: usize,
    pub negative_samples: usize,
}

#[derive(Debug, Clone)]
pub struct Layout {
    /// `[K, 2]` neighbor-preserving coordinates
    pub nonlinear: Array2<f64>,
    pub linear: LinearProjection,
    pub meta: LayoutMeta,
}

/// How far 2D proximity on the nonlinear map can be trusted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Guardrail {
    pub k: usize,
    /// Mean kNN overlap in `[0, 1]`
    pub overlap_score: f64,
    pub note: String,
}

/// Compute both projections of the `[K, R]` selected profiles
pub fn project(profiles: ArrayView2<'_, f64>, config: &LayoutConfig) -> Result<Layout> {
    config.validate()?;
    let samples = profiles.nrows();
    if samples < MIN_LAYOUT_SAMPLES {
        return Err(AtlasError::UnderDetermined {
            samples,
            required: MIN_LAYOUT_SAMPLES,
        });
    }

    let requested = config.n_neighbors;
    let (effective, clamped) = if requested <= samples {
        (requested, false)
    } else {
        match config.neighbor_policy {
            NeighborPolicy::Clamp => {
                warn!(
                    "n_neighbors {} exceeds {} samples; clamping to {}",
                    requested, samples, samples
                );
                (samples, true)
            }
            NeighborPolicy::Fail => {
                return Err(AtlasError::UnderDetermined {
                    samples,
                    required: requested,
                });
            }
        }
    };

    let linear = pca_2d(profiles, config.random_seed)?;
    let params = EmbeddingParams {
        n_neighbors: effective,
        min_dist: config.min_dist,
        n_epochs: config.n_epochs,
        negative_samples: config.negative_samples,
        seed: config.random_seed,
    };
    let nonlinear = embed(profiles, linear.coords.view(), &params)?;
    info!(
        "Projected {} features (n_neighbors {}, seed {})",
        samples, effective, config.random_seed
    );

    Ok(Layout {
        nonlinear,
        linear,
        meta: LayoutMeta {
            seed: config.random_seed,
            n_neighbors_requested: requested,
            n_neighbors_effective: effective,
            clamped,
            min_dist: config.min_dist,
            n_epochs: config.n_epochs,
            negative_samples: config.negative_samples,
        },
    })
}

/// Mean overlap between each row's high-dimensional neighbor set and its
/// Euclidean k-nearest set in `low` (self excluded, ties to lower index).
///
/// `k` is clamped to `n - 1`; fewer than two rows score 0.
pub fn neighborhood_preservation(high: &[Vec<usize>], low: ArrayView2<'_, f64>, k: usize) -> f64 {
    let n = low.nrows();
    let k_eff = k.min(n.saturating_sub(1));
    if n <= 1 || k_eff == 0 {
        return 0.0;
    }

    let total: f64 = (0..n)
        .map(|i| {
            let mut by_distance: Vec<(usize, f64)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| {
                    let dx = low[[i, 0]] - low[[j, 0]];
                    let dy = low[[i, 1]] - low[[j, 1]];
                    // negated so by_value_desc sorts nearest first
                    (j, -(dx * dx + dy * dy))
                })
                .collect();
            by_distance.sort_by(by_value_desc);
            let low_set: HashSet<usize> = by_distance.iter().take(k_eff).map(|&(j, _)| j).collect();
            let hits = high
                .get(i)
                .map(|row| row.iter().take(k_eff).filter(|j| low_set.contains(j)).count())
                .unwrap_or(0);
            hits as f64 / k_eff as f64
        })
        .sum();
    total / n as f64
}

/// Guardrail for a layout at the neighbor graph's `k`
pub fn guardrail(graph: &NeighborGraph, layout: &Layout) -> Guardrail {
    let overlap_score = neighborhood_preservation(&graph.indices, layout.nonlinear.view(), graph.k);
    info!(
        "Neighborhood preservation at k = {}: {:.4}",
        graph.k, overlap_score
    );
    Guardrail {
        k: graph.k,
        overlap_score,
        note: GUARDRAIL_NOTE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    /// Points on a circle in 2D, embedded isometrically in 3D
    fn circle(n: usize) -> (Array2<f64>, Array2<f64>) {
        let mut high = Array2::<f64>::zeros((n, 3));
        let mut low = Array2::<f64>::zeros((n, 2));
        for i in 0..n {
            let t = i as f64 * std::f64::consts::TAU / n as f64;
            high[[i, 0]] = t.cos();
            high[[i, 1]] = t.sin();
            high[[i, 2]] = 1.0;
            low[[i, 0]] = t.cos();
            low[[i, 1]] = t.sin();
        }
        (high, low)
    }

    #[test]
    fn test_isometric_layout_scores_one() {
        let (high, low) = circle(12);
        let graph = NeighborGraph::build(high.view(), 2);
        let score = neighborhood_preservation(&graph.indices, low.view(), 2);
        assert!((score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_scrambled_layout_scores_below_one() {
        let (high, _) = circle(8);
        let graph = NeighborGraph::build(high.view(), 2);
        // All points on a line in index order 0, 4, 1, 5, ...
        let order = [0.0, 2.0, 4.0, 6.0, 1.0, 3.0, 5.0, 7.0];
        let mut low = Array2::<f64>::zeros((8, 2));
        for (i, &x) in order.iter().enumerate() {
            low[[i, 0]] = x;
        }
        let score = neighborhood_preservation(&graph.indices, low.view(), 2);
        assert!((0.0..1.0).contains(&score));
    }

    #[test]
    fn test_preservation_degenerate() {
        let low = array![[0.0, 0.0]];
        assert_eq!(neighborhood_preservation(&[vec![]], low.view(), 3), 0.0);
    }

    #[test]
    fn test_project_clamps_neighbors() {
        let x = array![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let config = LayoutConfig {
            n_neighbors: 15,
            n_epochs: 20,
            ..Default::default()
        };
        let layout = project(x.view(), &config).unwrap();
        assert!(layout.meta.clamped);
        assert_eq!(layout.meta.n_neighbors_effective, 3);
        assert_eq!(layout.nonlinear.shape(), &[3, 2]);
        assert_eq!(layout.linear.coords.shape(), &[3, 2]);
    }

    #[test]
    fn test_project_fail_policy() {
        let x = array![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let config = LayoutConfig {
            neighbor_policy: NeighborPolicy::Fail,
            ..Default::default()
        };
        assert!(matches!(
            project(x.view(), &config),
            Err(AtlasError::UnderDetermined { samples: 3, required: 15 })
        ));
    }

    #[test]
    fn test_project_requires_two_samples() {
        let x = array![[1.0, 0.0]];
        assert!(matches!(
            project(x.view(), &LayoutConfig::default()),
            Err(AtlasError::UnderDetermined { samples: 1, required: 2 })
        ));
    }

    #[test]
    fn test_project_deterministic() {
        let x = array![[1.0, 0.0, 0.2], [0.0, 1.0, 0.1], [1.0, 1.0, 0.0], [0.3, 0.2, 1.0]];
        let config = LayoutConfig {
            n_neighbors: 3,
            n_epochs: 30,
            ..Default::default()
        };
        let a = project(x.view(), &config).unwrap();
        let b = project(x.view(), &config).unwrap();
        assert_eq!(a.nonlinear, b.nonlinear);
        assert_eq!(a.meta.seed, 42);
    }
}
