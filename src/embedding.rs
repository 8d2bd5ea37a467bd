//! Neighbor-preserving nonlinear 2D embedding
//!
//! A fuzzy-simplicial-set layout in the UMAP family:
//!
//! 1. cosine kNN graph (self counted in `n_neighbors`)
//! 2. per-point `rho` / `sigma` calibrated so each point's membership mass
//!    equals `log2(n_neighbors)`
//! 3. symmetrized membership `w_ij + w_ji - w_ij·w_ji`, stored in both
//!    directions so every point is the head of its edges
//! 4. low-dimensional curve `1 / (1 + a·d^(2b))` fitted to `min_dist`
//! 5. stochastic gradient descent from the linear layout, with negative
//!    sampling and clipped gradients
//!
//! The optimizer is single-threaded and drives one seeded RNG, so output is
//! reproducible for a fixed seed.

use std::collections::BTreeMap;

use ndarray::{Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::error::{ensure_dim, AtlasError, Result};
use crate::neighbors::NeighborGraph;

const SMOOTH_K_ITER: usize = 64;
const SMOOTH_K_TOL: f64 = 1e-5;
const MIN_K_DIST_SCALE: f64 = 1e-3;
const GRAD_CLIP: f64 = 4.0;
const INIT_SCALE: f64 = 10.0;
const INIT_JITTER: f64 = 1e-4;
const SPREAD: f64 = 1.0;

/// Parameters of one embedding run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmbeddingParams {
    /// Neighborhood size, self included; must not exceed the sample count
    pub n_neighbors: usize,
    pub min_dist: f64,
    pub n_epochs: usize,
    pub negative_samples: usize,
    pub seed: u64,
}

/// Embed the rows of `x` in 2D, starting from `init` (`[K, 2]`).
pub fn embed(x: ArrayView2<'_, f64>, init: ArrayView2<'_, f64>, params: &EmbeddingParams) -> Result<Array2<f64>> {
    let n = x.nrows();
    ensure_dim("embedding init rows", n, init.nrows())?;
    ensure_dim("embedding init width", 2, init.ncols())?;
    if params.n_neighbors < 2 || params.n_neighbors > n {
        return Err(AtlasError::UnderDetermined {
            samples: n,
            required: params.n_neighbors.max(2),
        });
    }

    let edges = fuzzy_graph(x, params.n_neighbors);
    let (a, b) = fit_ab(params.min_dist);
    debug!(
        "Embedding: {} points, {} edges, a = {:.4}, b = {:.4}",
        n,
        edges.len(),
        a,
        b
    );

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut embedding = initial_layout(init, &mut rng);
    optimize(&mut embedding, &edges, a, b, params, &mut rng);
    Ok(embedding)
}

/// Symmetrized fuzzy membership edges `(head, tail, w)`.
///
/// Each undirected pair appears as both `(i, j)` and `(j, i)` with the same
/// weight, ordered by `(head, tail)`.
pub(crate) fn fuzzy_graph(x: ArrayView2<'_, f64>, n_neighbors: usize) -> Vec<(usize, usize, f64)> {
    let graph = NeighborGraph::build(x, n_neighbors - 1);
    let target = (n_neighbors as f64).log2();
    let mean_all = {
        let all: Vec<f64> = graph
            .similarities
            .iter()
            .flatten()
            .map(|&s| cosine_distance(s))
            .collect();
        if all.is_empty() {
            0.0
        } else {
            all.iter().sum::<f64>() / all.len() as f64
        }
    };

    let mut directed: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for (i, (indices, sims)) in graph.indices.iter().zip(&graph.similarities).enumerate() {
        let dists: Vec<f64> = sims.iter().map(|&s| cosine_distance(s)).collect();
        let (rho, sigma) = smooth_knn_dist(&dists, target, mean_all);
        for (&j, &d) in indices.iter().zip(&dists) {
            let excess = d - rho;
            let w = if excess <= 0.0 || sigma <= 0.0 {
                1.0
            } else {
                (-excess / sigma).exp()
            };
            directed.insert((i, j), w);
        }
    }

    let mut symmetric: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for (&(i, j), &w) in &directed {
        let key = (i.min(j), i.max(j));
        if symmetric.contains_key(&key) {
            continue;
        }
        let w_rev = directed.get(&(j, i)).copied().unwrap_or(0.0);
        symmetric.insert(key, w + w_rev - w * w_rev);
    }
    let mut edges: Vec<(usize, usize, f64)> = symmetric
        .into_iter()
        .filter(|&(_, w)| w > 0.0)
        .flat_map(|((i, j), w)| [(i, j, w), (j, i, w)])
        .collect();
    edges.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    edges
}

fn cosine_distance(similarity: f64) -> f64 {
    (1.0 - similarity).max(0.0)
}

/// Binary search for `sigma` so that `Σ exp(-(d - rho) / sigma) = target`
fn smooth_knn_dist(dists: &[f64], target: f64, mean_all: f64) -> (f64, f64) {
    let rho = dists.iter().copied().find(|&d| d > 0.0).unwrap_or(0.0);
    let mut lo = 0.0;
    let mut hi = f64::INFINITY;
    let mut mid = 1.0;

    for _ in 0..SMOOTH_K_ITER {
        let psum: f64 = dists
            .iter()
            .map(|&d| {
                let excess = d - rho;
                if excess > 0.0 {
                    (-excess / mid).exp()
                } else {
                    1.0
                }
            })
            .sum();
        if (psum - target).abs() < SMOOTH_K_TOL {
            break;
        }
        if psum > target {
            hi = mid;
            mid = (lo + hi) / 2.0;
        } else {
            lo = mid;
            mid = if hi.is_infinite() { mid * 2.0 } else { (lo + hi) / 2.0 };
        }
    }

    let floor = if rho > 0.0 {
        let mean_local = dists.iter().sum::<f64>() / dists.len().max(1) as f64;
        MIN_K_DIST_SCALE * mean_local
    } else {
        MIN_K_DIST_SCALE * mean_all
    };
    (rho, mid.max(floor))
}

/// Least-squares fit of `1 / (1 + a·x^(2b))` to the target membership curve
/// over `[0, 3]`, by compass search.
pub(crate) fn fit_ab(min_dist: f64) -> (f64, f64) {
    let xs: Vec<f64> = (0..300).map(|i| i as f64 * 3.0 * SPREAD / 299.0).collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&x| {
            if x < min_dist {
                1.0
            } else {
                (-(x - min_dist) / SPREAD).exp()
            }
        })
        .collect();
    let loss = |a: f64, b: f64| -> f64 {
        xs.iter()
            .zip(&ys)
            .map(|(&x, &y)| {
                let f = 1.0 / (1.0 + a * x.powf(2.0 * b));
                (f - y) * (f - y)
            })
            .sum()
    };

    let (mut a, mut b) = (1.5, 0.9);
    let mut best = loss(a, b);
    let mut step = 0.5;
    while step > 1e-7 {
        let mut improved = false;
        for (da, db) in [(step, 0.0), (-step, 0.0), (0.0, step), (0.0, -step)] {
            let (ca, cb) = (a + da, b + db);
            if ca <= 0.0 || cb <= 0.0 {
                continue;
            }
            let l = loss(ca, cb);
            if l < best {
                best = l;
                a = ca;
                b = cb;
                improved = true;
            }
        }
        if !improved {
            step /= 2.0;
        }
    }
    (a, b)
}

/// Scale the linear layout to `[-10, 10]` and add seeded jitter
fn initial_layout(init: ArrayView2<'_, f64>, rng: &mut StdRng) -> Array2<f64> {
    let max_abs = init.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    let scale = if max_abs > 0.0 { INIT_SCALE / max_abs } else { 1.0 };
    let mut out = init.mapv(|v| v * scale);
    out.mapv_inplace(|v| v + rng.gen_range(-INIT_JITTER..INIT_JITTER));
    out
}

fn clip(v: f64) -> f64 {
    v.clamp(-GRAD_CLIP, GRAD_CLIP)
}

fn optimize(
    embedding: &mut Array2<f64>,
    edges: &[(usize, usize, f64)],
    a: f64,
    b: f64,
    params: &EmbeddingParams,
    rng: &mut StdRng,
) {
    let n = embedding.nrows();
    let n_epochs = params.n_epochs;
    let max_w = edges.iter().fold(0.0f64, |m, e| m.max(e.2));
    if max_w <= 0.0 {
        return;
    }

    // Edges too weak to be sampled once are dropped
    let kept: Vec<(usize, usize, f64)> = edges
        .iter()
        .copied()
        .filter(|e| e.2 >= max_w / n_epochs as f64)
        .map(|(i, j, w)| (i, j, max_w / w))
        .collect();
    let mut next_sample: Vec<f64> = kept.iter().map(|e| e.2).collect();

    for epoch in 0..n_epochs {
        let alpha = 1.0 - epoch as f64 / n_epochs as f64;
        for (e, &(head, tail, epochs_per_sample)) in kept.iter().enumerate() {
            if next_sample[e] > epoch as f64 {
                continue;
            }

            let dx = embedding[[head, 0]] - embedding[[tail, 0]];
            let dy = embedding[[head, 1]] - embedding[[tail, 1]];
            let dist_sq = dx * dx + dy * dy;
            if dist_sq > 0.0 {
                let coeff = -2.0 * a * b * dist_sq.powf(b - 1.0) / (a * dist_sq.powf(b) + 1.0);
                let gx = clip(coeff * dx) * alpha;
                let gy = clip(coeff * dy) * alpha;
                embedding[[head, 0]] += gx;
                embedding[[head, 1]] += gy;
                embedding[[tail, 0]] -= gx;
                embedding[[tail, 1]] -= gy;
            }

            for _ in 0..params.negative_samples {
                let other = rng.gen_range(0..n);
                if other == head {
                    continue;
                }
                let dx = embedding[[head, 0]] - embedding[[other, 0]];
                let dy = embedding[[head, 1]] - embedding[[other, 1]];
                let dist_sq = dx * dx + dy * dy;
                let (gx, gy) = if dist_sq > 0.0 {
                    let coeff = 2.0 * b / ((0.001 + dist_sq) * (a * dist_sq.powf(b) + 1.0));
                    (clip(coeff * dx), clip(coeff * dy))
                } else {
                    (GRAD_CLIP, GRAD_CLIP)
                };
                embedding[[head, 0]] += gx * alpha;
                embedding[[head, 1]] += gy * alpha;
            }

            next_sample[e] += epochs_per_sample;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_clusters() -> Array2<f64> {
        array![
            [1.0, 0.0, 0.0],
            [0.95, 0.05, 0.0],
            [0.9, 0.1, 0.0],
            [0.92, 0.0, 0.08],
            [0.0, 1.0, 0.0],
            [0.05, 0.95, 0.0],
            [0.0, 0.9, 0.1],
            [0.08, 0.92, 0.0],
        ]
    }

    fn params(seed: u64) -> EmbeddingParams {
        EmbeddingParams {
            n_neighbors: 4,
            min_dist: 0.1,
            n_epochs: 100,
            negative_samples: 3,
            seed,
        }
    }

    #[test]
    fn test_fit_ab_default_min_dist() {
        let (a, b) = fit_ab(0.1);
        assert!((a - 1.577).abs() < 0.05, "a = {a}");
        assert!((b - 0.895).abs() < 0.05, "b = {b}");
    }

    #[test]
    fn test_fuzzy_graph_symmetric_weights() {
        let x = two_clusters();
        let edges = fuzzy_graph(x.view(), 4);
        assert!(!edges.is_empty());
        for &(i, j, w) in &edges {
            assert_ne!(i, j);
            assert!(w > 0.0 && w <= 1.0);
            let reverse = edges.iter().find(|e| e.0 == j && e.1 == i).unwrap();
            assert_eq!(reverse.2, w);
        }
    }

    #[test]
    fn test_every_point_heads_an_edge() {
        let x = array![
            [1.0, 0.0, 0.0],
            [0.8, 0.2, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.7, 0.3],
            [0.1, 0.1, 1.0],
        ];
        let edges = fuzzy_graph(x.view(), 3);
        for point in 0..5 {
            assert!(edges.iter().any(|e| e.0 == point), "point {point} never a head");
        }
    }

    #[test]
    fn test_embed_deterministic_and_separates_clusters() {
        let x = two_clusters();
        let init = array![
            [1.0, 0.0],
            [0.9, 0.1],
            [0.8, 0.0],
            [0.9, -0.1],
            [-1.0, 0.0],
            [-0.9, 0.1],
            [-0.8, 0.0],
            [-0.9, -0.1],
        ];
        let a = embed(x.view(), init.view(), &params(3)).unwrap();
        let b = embed(x.view(), init.view(), &params(3)).unwrap();
        assert_eq!(a, b);
        assert!(a.iter().all(|v| v.is_finite()));

        let centroid = |rows: std::ops::Range<usize>| {
            let len = rows.len() as f64;
            let (sx, sy) = rows.fold((0.0, 0.0), |(sx, sy), r| (sx + a[[r, 0]], sy + a[[r, 1]]));
            (sx / len, sy / len)
        };
        let (ax, ay) = centroid(0..4);
        let (bx, by) = centroid(4..8);
        let between = ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt();
        let spread = (0..4)
            .map(|r| ((a[[r, 0]] - ax).powi(2) + (a[[r, 1]] - ay).powi(2)).sqrt())
            .fold(0.0f64, f64::max);
        assert!(between > spread);
    }

    #[test]
    fn test_embed_rejects_too_many_neighbors() {
        let x = two_clusters();
        let init = Array2::<f64>::zeros((8, 2));
        let p = EmbeddingParams {
            n_neighbors: 9,
            ..params(0)
        };
        assert!(matches!(
            embed(x.view(), init.view(), &p),
            Err(AtlasError::UnderDetermined { samples: 8, required: 9 })
        ));
    }
}
