//! Shared numeric primitives
//!
//! Cosine similarity, norms, population statistics and Shannon entropy over
//! 1-D views. Every function defines its degenerate case explicitly instead
//! of returning NaN.

use ndarray::ArrayView1;
use std::cmp::Ordering;

/// Floor used wherever a statistic divides by a possibly-zero magnitude
pub const EPSILON: f64 = 1e-8;

/// Dot product of two equal-length views
pub fn dot(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.dot(&b)
}

/// Euclidean norm
pub fn l2_norm(v: ArrayView1<'_, f64>) -> f64 {
    v.dot(&v).sqrt()
}

/// Cosine similarity; 0 when either vector has zero norm
pub fn cosine_similarity(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    let na = l2_norm(a);
    let nb = l2_norm(b);
    cosine_with_norms(a, b, na, nb)
}

/// Cosine similarity with precomputed norms
pub fn cosine_with_norms(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>, na: f64, nb: f64) -> f64 {
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (a.dot(&b) / (na * nb)).clamp(-1.0, 1.0)
}

/// Arithmetic mean; 0 for an empty view
pub fn mean(v: ArrayView1<'_, f64>) -> f64 {
    if v.is_empty() {
        0.0
    } else {
        v.sum() / v.len() as f64
    }
}

/// Population standard deviation; 0 for an empty view
pub fn population_std(v: ArrayView1<'_, f64>) -> f64 {
    if v.is_empty() {
        return 0.0;
    }
    let mu = mean(v);
    let var = v.iter().map(|x| (x - mu) * (x - mu)).sum::<f64>() / v.len() as f64;
    var.sqrt()
}

/// Shannon entropy (nats) of a non-negative profile normalized to sum 1.
///
/// Negative entries are clipped to 0 first. An all-zero profile has
/// entropy 0. The result lies in `[0, ln(len)]`.
pub fn shannon_entropy(v: ArrayView1<'_, f64>) -> f64 {
    let total: f64 = v.iter().map(|x| x.max(0.0)).sum();
    if total <= 0.0 {
        return 0.0;
    }
    v.iter()
        .map(|x| x.max(0.0) / total)
        .filter(|&p| p > 0.0)
        .map(|p| -p * p.ln())
        .sum()
}

/// Index of the maximum value, lowest index on ties
pub fn argmax(v: ArrayView1<'_, f64>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &x) in v.iter().enumerate() {
        match best {
            Some((_, b)) if x <= b => {}
            _ => best = Some((i, x)),
        }
    }
    best.map(|(i, _)| i)
}

/// Indices sorted by value descending, lower index first on ties
pub fn descending_indices(v: ArrayView1<'_, f64>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..v.len()).collect();
    order.sort_by(|&a, &b| v[b].total_cmp(&v[a]).then(a.cmp(&b)));
    order
}

/// Order `(index, value)` pairs by value descending, then index ascending
pub fn by_value_desc(a: &(usize, f64), b: &(usize, f64)) -> Ordering {
    b.1.total_cmp(&a.1).then(a.0.cmp(&b.0))
}

/// Replace NaN / infinity with 0 for export
pub fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

/// Median of a slice (mean of the two middle values for even length)
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}
