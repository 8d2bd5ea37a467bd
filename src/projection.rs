//! Linear variance-maximizing 2D projection
//!
//! Principal components of the `[K, R]` profile matrix via power iteration
//! with deflation on the small `R × R` covariance. The first component's
//! per-role loadings are the interpretable contrast direction.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::error::{AtlasError, Result};

const MAX_ITER: usize = 1000;
const CONVERGENCE_TOL: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct LinearProjection {
    /// `[K, 2]` coordinates
    pub coords: Array2<f64>,
    /// `[2, R]` unit principal axes
    pub components: Array2<f64>,
    /// Variance fraction captured by each component
    pub explained_variance_ratio: [f64; 2],
    /// Loading of each role on the first component
    pub pc1_role_loadings: Vec<f64>,
}

/// Project rows of `x` onto their top two principal components.
///
/// Deterministic for a fixed `seed`. Each component is sign-fixed so that
/// its largest-magnitude loading is positive. Missing dimensions (R < 2, or
/// zero variance) yield zero components.
pub fn pca_2d(x: ArrayView2<'_, f64>, seed: u64) -> Result<LinearProjection> {
    let n = x.nrows();
    let dims = x.ncols();
    if n == 0 || dims == 0 {
        return Err(AtlasError::InvalidInput(
            "linear projection needs a non-empty matrix".into(),
        ));
    }

    let mean = x
        .mean_axis(Axis(0))
        .ok_or_else(|| AtlasError::InvalidInput("no rows to center".into()))?;
    let centered = &x - &mean;
    let denom = (n.max(2) - 1) as f64;
    let mut cov = centered.t().dot(&centered) / denom;
    let total_variance: f64 = cov.diag().sum();

    let mut rng = StdRng::seed_from_u64(seed);
    let mut components = Array2::<f64>::zeros((2, dims));
    let mut ratios = [0.0; 2];

    for c in 0..2.min(dims) {
        let (lambda, v) = leading_eigenpair(&cov, components.view(), c, &mut rng);
        if lambda <= 0.0 {
            break;
        }
        // deflate
        cov.scaled_add(-lambda, &outer(&v));
        ratios[c] = if total_variance > 0.0 {
            lambda / total_variance
        } else {
            0.0
        };
        components.row_mut(c).assign(&v);
    }

    let coords = centered.dot(&components.t());
    debug!(
        "Linear projection: explained variance {:.4} / {:.4}",
        ratios[0], ratios[1]
    );

    Ok(LinearProjection {
        coords,
        pc1_role_loadings: components.row(0).to_vec(),
        components,
        explained_variance_ratio: ratios,
    })
}

/// Power iteration for the dominant eigenpair of a symmetric PSD matrix,
/// kept orthogonal to the first `found` rows of `previous`.
fn leading_eigenpair(
    cov: &Array2<f64>,
    previous: ArrayView2<'_, f64>,
    found: usize,
    rng: &mut StdRng,
) -> (f64, Array1<f64>) {
    let dims = cov.nrows();
    let mut v: Array1<f64> = (0..dims).map(|_| rng.gen::<f64>() - 0.5).collect();
    orthogonalize(&mut v, previous, found);
    if !normalize(&mut v) {
        return (0.0, Array1::zeros(dims));
    }

    let mut lambda = 0.0;
    for _ in 0..MAX_ITER {
        let mut w = cov.dot(&v);
        orthogonalize(&mut w, previous, found);
        let new_lambda = v.dot(&w);
        if !normalize(&mut w) {
            return (0.0, Array1::zeros(dims));
        }
        let converged = (new_lambda - lambda).abs() < CONVERGENCE_TOL;
        lambda = new_lambda;
        v = w;
        if converged {
            break;
        }
    }

    fix_sign(&mut v);
    (lambda, v)
}

fn orthogonalize(v: &mut Array1<f64>, basis: ArrayView2<'_, f64>, count: usize) {
    for row in basis.rows().into_iter().take(count) {
        let proj = v.dot(&row);
        v.scaled_add(-proj, &row);
    }
}

fn normalize(v: &mut Array1<f64>) -> bool {
    let norm = v.dot(v).sqrt();
    if norm < 1e-15 {
        return false;
    }
    *v /= norm;
    true
}

/// Flip so the largest-magnitude entry is positive (lowest index on ties)
fn fix_sign(v: &mut Array1<f64>) {
    let mut best = 0;
    for (i, x) in v.iter().enumerate() {
        if x.abs() > v[best].abs() {
            best = i;
        }
    }
    if v[best] < 0.0 {
        v.mapv_inplace(|x| -x);
    }
}

fn outer(v: &Array1<f64>) -> Array2<f64> {
    let col = v.view().insert_axis(Axis(1));
    let row = v.view().insert_axis(Axis(0));
    col.dot(&row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_pca_recovers_dominant_axis() {
        // Points spread along (1, 1, 0) with a small (1, -1, 0) component
        let x = array![
            [2.0, 2.0, 0.0],
            [-2.0, -2.0, 0.0],
            [1.0, 1.0, 0.0],
            [-1.0, -1.0, 0.0],
            [0.1, -0.1, 0.0],
            [-0.1, 0.1, 0.0],
        ];
        let p = pca_2d(x.view(), 42).unwrap();
        let h = std::f64::consts::FRAC_1_SQRT_2;
        assert!((p.pc1_role_loadings[0] - h).abs() < 1e-6);
        assert!((p.pc1_role_loadings[1] - h).abs() < 1e-6);
        assert!(p.pc1_role_loadings[2].abs() < 1e-6);
        assert!(p.explained_variance_ratio[0] > 0.99);
        let total: f64 = p.explained_variance_ratio.iter().sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert_eq!(p.coords.shape(), &[6, 2]);
        // First row projects onto a positive first coordinate
        assert!((p.coords[[0, 0]] - 2.0 * 2f64.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_pca_deterministic() {
        let x = array![[1.0, 0.0, 3.0], [0.5, 2.0, 1.0], [2.0, 1.0, 0.0], [0.0, 0.5, 0.5]];
        let a = pca_2d(x.view(), 7).unwrap();
        let b = pca_2d(x.view(), 7).unwrap();
        assert_eq!(a.coords, b.coords);
        // Components are orthonormal
        let c = &a.components;
        assert!((c.row(0).dot(&c.row(0)) - 1.0).abs() < 1e-9);
        assert!(c.row(0).dot(&c.row(1)).abs() < 1e-6);
    }

    #[test]
    fn test_pca_constant_rows() {
        let x = array![[1.0, 2.0], [1.0, 2.0]];
        let p = pca_2d(x.view(), 0).unwrap();
        assert!(p.coords.iter().all(|&v| v == 0.0));
        assert_eq!(p.explained_variance_ratio, [0.0, 0.0]);
    }
}
