//! Error taxonomy for the atlas and drift engines
//!
//! Structural problems (shape mismatch, missing role, under-determined
//! projection) surface here. Degenerate statistics at the tails of real data
//! (all-zero columns, zero share denominators) do not: they resolve to
//! documented fallback values inside the component that meets them.

use thiserror::Error;

/// Errors produced by the analytics core
#[derive(Debug, Error)]
pub enum AtlasError {
    /// Role count, feature width, or row alignment disagree between inputs
    #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    /// A role required by the computation is absent from the role catalog
    #[error("role '{0}' not found in role catalog")]
    MissingRole(String),

    /// Assistant centroid is indistinguishable from the contrast centroid
    #[error("degenerate assistant axis for role '{role}': ||axis|| = {norm:e}")]
    DegenerateAxis { role: String, norm: f64 },

    /// Too few samples for the configured neighbor count
    #[error("under-determined projection: {samples} samples, at least {required} required")]
    UnderDetermined { samples: usize, required: usize },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl AtlasError {
    pub(crate) fn shape(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::ShapeMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }
}

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, AtlasError>;

/// Fail fast when two dimensions disagree
pub(crate) fn ensure_dim(context: &str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(AtlasError::shape(context, expected, actual))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_dim() {
        assert!(ensure_dim("width", 4, 4).is_ok());
        let err = ensure_dim("width", 4, 5).unwrap_err();
        assert!(matches!(
            err,
            AtlasError::ShapeMismatch {
                expected: 4,
                actual: 5,
                ..
            }
        ));
        assert_eq!(
            err.to_string(),
            "shape mismatch in width: expected 4, got 5"
        );
    }
}
