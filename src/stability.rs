//! Split-half stability of feature role profiles
//!
//! Each role's responses are divided into two disjoint halves. Both halves
//! are mean-pooled into `[R, F]` matrices; a feature's stability is the
//! cosine between its two `[R]` half-profiles. Features that only look
//! role-specific because of prompt phrasing noise score low.

use ndarray::{Array1, Array2, Axis, Zip};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::config::StabilitySplit;
use crate::error::{AtlasError, Result};
use crate::matrix::{Pooling, RoleFeatureMatrix};
use crate::responses::{pool_rows, ResponseCorpus};

/// Per-feature split-half stability aligned with a matrix's role order.
///
/// The RNG is seeded once and consumed role by role in matrix order, so
/// the draw is reproducible for a fixed seed and role catalog.
pub fn split_half_stability(
    corpus: &ResponseCorpus,
    matrix: &RoleFeatureMatrix,
    split: StabilitySplit,
    seed: u64,
) -> Result<Array1<f64>> {
    matrix.ensure_width("stability response width", corpus.n_features())?;

    let n_roles = matrix.n_roles();
    let n_features = matrix.n_features();
    let mut a_half = Array2::<f64>::zeros((n_roles, n_features));
    let mut b_half = Array2::<f64>::zeros((n_roles, n_features));
    let mut rng = StdRng::seed_from_u64(seed);

    for (r, role_name) in matrix.roles().iter().enumerate() {
        let role = corpus
            .get(role_name)
            .ok_or_else(|| AtlasError::MissingRole(role_name.clone()))?;
        let (first, second) = role.split_halves(split, &mut rng)?;
        a_half
            .row_mut(r)
            .assign(&pool_rows(role.activations(), &first, Pooling::Mean)?);
        b_half
            .row_mut(r)
            .assign(&pool_rows(role.activations(), &second, Pooling::Mean)?);
    }

    let stability = column_cosine(&a_half, &b_half);
    info!(
        "Split-half stability ({:?}, seed {}): mean {:.4}",
        split,
        seed,
        stability.mean().unwrap_or(0.0)
    );
    Ok(stability)
}

/// Cosine similarity between matching columns; 0 where a column norm is 0
pub fn column_cosine(a: &Array2<f64>, b: &Array2<f64>) -> Array1<f64> {
    let numerator = (a * b).sum_axis(Axis(0));
    let a_norm = a.mapv(|v| v * v).sum_axis(Axis(0)).mapv(f64::sqrt);
    let b_norm = b.mapv(|v| v * v).sum_axis(Axis(0)).mapv(f64::sqrt);
    let mut out = Array1::<f64>::zeros(numerator.len());
    Zip::from(&mut out)
        .and(&numerator)
        .and(&a_norm)
        .and(&b_norm)
        .for_each(|o, &num, &na, &nb| {
            let denom = na * nb;
            *o = if denom > 0.0 { num / denom } else { 0.0 };
        });
    out
}
