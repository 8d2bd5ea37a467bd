//! Exact cosine k-nearest-neighbor graph over selected feature profiles
//!
//! Computed in full R-dimensional profile space, independent of any 2D
//! layout. Cost is `O(K²·R)`, which is why it only ever sees the selection.

use ndarray::{Array1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::numeric::{by_value_desc, cosine_with_norms, l2_norm};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NeighborGraph {
    /// Effective neighbor count `min(k, K - 1)`
    pub k: usize,
    /// `indices[i]`: rows nearest to row `i`, most similar first
    pub indices: Vec<Vec<usize>>,
    /// Cosine similarity matching each entry of `indices`
    pub similarities: Vec<Vec<f64>>,
}

impl NeighborGraph {
    /// Build the graph for the rows of `profiles`.
    ///
    /// Self is excluded, zero-norm rows have similarity 0 with everything,
    /// and ties go to the lower row index.
    pub fn build(profiles: ArrayView2<'_, f64>, k: usize) -> Self {
        let n = profiles.nrows();
        let k_eff = k.min(n.saturating_sub(1));
        let norms: Array1<f64> = profiles.map_axis(Axis(1), l2_norm);

        let rows: Vec<(Vec<usize>, Vec<f64>)> = (0..n)
            .into_par_iter()
            .map(|i| {
                let row = profiles.row(i);
                let mut sims: Vec<(usize, f64)> = (0..n)
                    .filter(|&j| j != i)
                    .map(|j| (j, cosine_with_norms(row, profiles.row(j), norms[i], norms[j])))
                    .collect();
                sims.sort_by(by_value_desc);
                sims.truncate(k_eff);
                sims.into_iter().unzip()
            })
            .collect();

        debug!("Neighbor graph: {} rows, k = {} (requested {})", n, k_eff, k);
        let (indices, similarities) = rows.into_iter().unzip();
        Self {
            k: k_eff,
            indices,
            similarities,
        }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}
