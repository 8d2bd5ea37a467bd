//! Assistant axis derivation
//!
//! `a_hat = normalize(centroid(assistant) - centroid(contrast roles))`,
//! derived once per role matrix and read-only afterwards.
//!
//! Centroids are taken from the untransformed pooled rows, the same space
//! as the turn and token vectors projected onto the axis.

use ndarray::{Array1, ArrayView1, Axis};
use serde::Serialize;
use tracing::info;

use crate::error::{ensure_dim, AtlasError, Result};
use crate::matrix::RoleFeatureMatrix;
use crate::numeric::l2_norm;

/// Axis norms below this are treated as degenerate
pub const DEGENERATE_NORM: f64 = 1e-10;

/// How an axis was derived
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AxisMetadata {
    pub assistant_role: String,
    pub contrast_roles: Vec<String>,
    /// `||centroid_assistant - centroid_other||` before normalization
    pub raw_norm: f64,
    pub n_features: usize,
}

/// Unit-norm contrast direction over the feature space
#[derive(Debug, Clone)]
pub struct AssistantAxis {
    direction: Array1<f64>,
    metadata: AxisMetadata,
}

impl AssistantAxis {
    /// Contrast the assistant role against every other role
    pub fn derive(matrix: &RoleFeatureMatrix, assistant_role: &str) -> Result<Self> {
        let assistant = matrix.require_role(assistant_role)?;
        let contrast: Vec<String> = matrix
            .roles()
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != assistant)
            .map(|(_, r)| r.clone())
            .collect();
        Self::derive_with_contrast(matrix, assistant_role, &contrast)
    }

    /// Contrast the assistant role against an explicit set of roles
    pub fn derive_with_contrast(
        matrix: &RoleFeatureMatrix,
        assistant_role: &str,
        contrast_roles: &[String],
    ) -> Result<Self> {
        let assistant = matrix.require_role(assistant_role)?;
        let mut contrast = Vec::with_capacity(contrast_roles.len());
        for role in contrast_roles {
            let idx = matrix.require_role(role)?;
            if idx == assistant {
                return Err(AtlasError::InvalidInput(format!(
                    "assistant role '{role}' cannot be its own contrast"
                )));
            }
            contrast.push(idx);
        }
        if contrast.is_empty() {
            return Err(AtlasError::InvalidInput(
                "assistant axis needs at least one contrast role".into(),
            ));
        }

        let values = matrix.raw();
        let other = values
            .select(Axis(0), &contrast)
            .mean_axis(Axis(0))
            .ok_or_else(|| AtlasError::InvalidInput("empty contrast centroid".into()))?;
        let raw = &values.row(assistant) - &other;
        let raw_norm = l2_norm(raw.view());
        if raw_norm < DEGENERATE_NORM {
            return Err(AtlasError::DegenerateAxis {
                role: assistant_role.to_string(),
                norm: raw_norm,
            });
        }

        info!(
            "Assistant axis for '{}' against {} roles (||raw|| = {:.4})",
            assistant_role,
            contrast.len(),
            raw_norm
        );
        Ok(Self {
            direction: raw / raw_norm,
            metadata: AxisMetadata {
                assistant_role: assistant_role.to_string(),
                contrast_roles: contrast_roles.to_vec(),
                raw_norm,
                n_features: matrix.n_features(),
            },
        })
    }

    /// Signed projection length of a feature vector
    pub fn project(&self, x: ArrayView1<'_, f64>) -> Result<f64> {
        ensure_dim("axis projection width", self.dim(), x.len())?;
        Ok(x.dot(&self.direction))
    }

    pub fn direction(&self) -> ArrayView1<'_, f64> {
        self.direction.view()
    }

    pub fn metadata(&self) -> &AxisMetadata {
        &self.metadata
    }

    pub fn dim(&self) -> usize {
        self.direction.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Pooling;
    use ndarray::{array, aview1};

    fn two_roles() -> RoleFeatureMatrix {
        RoleFeatureMatrix::new(
            vec!["assistant".into(), "pirate".into()],
            array![[1.0, 0.0], [0.0, 1.0]],
            Pooling::Mean,
        )
        .unwrap()
    }

    #[test]
    fn test_two_role_axis() {
        let axis = AssistantAxis::derive(&two_roles(), "assistant").unwrap();
        let h = std::f64::consts::FRAC_1_SQRT_2;
        assert!((axis.direction()[0] - h).abs() < 1e-12);
        assert!((axis.direction()[1] + h).abs() < 1e-12);
        assert!((l2_norm(axis.direction()) - 1.0).abs() < 1e-9);

        let pirate_like = axis.project(aview1(&[0.0, 1.0])).unwrap();
        let assistant_like = axis.project(aview1(&[1.0, 0.0])).unwrap();
        assert!((pirate_like + 0.7071).abs() < 1e-4);
        assert!((assistant_like - 0.7071).abs() < 1e-4);
        assert_eq!(axis.metadata().contrast_roles, vec!["pirate".to_string()]);
    }

    #[test]
    fn test_missing_role() {
        assert!(matches!(
            AssistantAxis::derive(&two_roles(), "narrator"),
            Err(AtlasError::MissingRole(_))
        ));
    }

    #[test]
    fn test_degenerate_axis() {
        let m = RoleFeatureMatrix::new(
            vec!["assistant".into(), "a".into(), "b".into()],
            array![[1.0, 1.0], [0.5, 1.5], [1.5, 0.5]],
            Pooling::Mean,
        )
        .unwrap();
        assert!(matches!(
            AssistantAxis::derive(&m, "assistant"),
            Err(AtlasError::DegenerateAxis { .. })
        ));
    }

    #[test]
    fn test_explicit_contrast() {
        let m = RoleFeatureMatrix::new(
            vec!["assistant".into(), "pirate".into(), "poet".into()],
            array![[2.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 2.0]],
            Pooling::Mean,
        )
        .unwrap();
        let axis = AssistantAxis::derive_with_contrast(&m, "assistant", &["poet".to_string()]).unwrap();
        assert!(axis.direction()[1].abs() < 1e-12);
        assert!(AssistantAxis::derive_with_contrast(&m, "assistant", &[]).is_err());
        assert!(AssistantAxis::derive_with_contrast(&m, "assistant", &["assistant".to_string()]).is_err());
    }

    #[test]
    fn test_axis_ignores_activation_transform() {
        use crate::matrix::ActivationTransform;

        let roles = vec!["assistant".to_string(), "b".to_string(), "c".to_string()];
        let pooled = array![[1.2, 1.0], [0.0, 2.0], [3.0, 0.0]];
        let logged = RoleFeatureMatrix::with_transform(
            roles.clone(),
            pooled.clone(),
            Pooling::Mean,
            ActivationTransform::Log1p,
        )
        .unwrap();
        let plain = RoleFeatureMatrix::new(roles, pooled.clone(), Pooling::Mean).unwrap();

        let axis = AssistantAxis::derive(&logged, "assistant").unwrap();
        let reference = AssistantAxis::derive(&plain, "assistant").unwrap();
        assert_eq!(axis.direction(), reference.direction());

        // Assistant pooled row outscores the contrast centroid by ||axis_raw||
        let assistant = axis.project(pooled.row(0)).unwrap();
        let contrast = axis.project(aview1(&[1.5, 1.0])).unwrap();
        assert!(assistant > contrast);
        assert!((assistant - contrast - axis.metadata().raw_norm).abs() < 1e-12);
    }

    #[test]
    fn test_projection_width_mismatch() {
        let axis = AssistantAxis::derive(&two_roles(), "assistant").unwrap();
        assert!(matches!(
            axis.project(aview1(&[1.0, 0.0, 0.0])),
            Err(AtlasError::ShapeMismatch { .. })
        ));
    }
}
