//! Role Similarity Engine

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;
use tracing::debug;

use crate::numeric::{cosine_with_norms, l2_norm};

/// Pairwise cosine similarity between rows of `[R, D]` role vectors.
///
/// Symmetric, diagonal exactly 1 (self-similarity is defined, including for
/// zero rows), and 0 between a zero row and any other row.
pub fn role_similarity(role_vectors: ArrayView2<'_, f64>) -> Array2<f64> {
    let n = role_vectors.nrows();
    let norms: Array1<f64> = role_vectors.map_axis(Axis(1), l2_norm);

    // Upper triangle per row, mirrored afterwards
    let upper: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| {
            (i + 1..n)
                .map(|j| cosine_with_norms(role_vectors.row(i), role_vectors.row(j), norms[i], norms[j]))
                .collect()
        })
        .collect();

    let mut sim = Array2::<f64>::eye(n);
    for (i, row) in upper.into_iter().enumerate() {
        for (offset, s) in row.into_iter().enumerate() {
            let j = i + 1 + offset;
            sim[[i, j]] = s;
            sim[[j, i]] = s;
        }
    }
    debug!("Role similarity over {} roles x {} dims", n, role_vectors.ncols());
    sim
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_symmetric_unit_diagonal() {
        let v = array![[1.0, 2.0, 0.0], [2.0, 4.0, 0.0], [0.0, 0.0, 3.0], [1.0, 0.0, 1.0]];
        let s = role_similarity(v.view());
        for i in 0..4 {
            assert_eq!(s[[i, i]], 1.0);
            for j in 0..4 {
                assert_eq!(s[[i, j]], s[[j, i]]);
            }
        }
        assert!((s[[0, 1]] - 1.0).abs() < 1e-12);
        assert_eq!(s[[0, 2]], 0.0);
    }

    #[test]
    fn test_zero_row() {
        let v = array![[0.0, 0.0], [1.0, 1.0]];
        let s = role_similarity(v.view());
        assert_eq!(s[[0, 0]], 1.0);
        assert_eq!(s[[0, 1]], 0.0);
        assert_eq!(s[[1, 0]], 0.0);
    }
}
