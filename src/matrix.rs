//! Role × feature activation matrix
//!
//! Holds one pooled activation row per role. Row order fixes the role index
//! used by every downstream structure (coordinates, neighbor lists,
//! similarity matrix). The aggregation mode is consumed once here: question
//! centering produces residual values at construction time, so no downstream
//! statistic branches on it.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use ndarray::{Array, Array2, ArrayView1, Axis, Dimension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ensure_dim, AtlasError, Result};
use crate::responses::{pool_rows, ResponseCorpus};

/// How response vectors are reduced to one role vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pooling {
    Mean,
    Max,
}

/// Whether shared per-question structure is removed before role statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    Raw,
    QuestionCentered,
}

/// Elementwise transform applied to pooled activations before centering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationTransform {
    Identity,
    Log1p,
}

impl ActivationTransform {
    pub fn apply<D: Dimension>(&self, values: &mut Array<f64, D>) {
        if let Self::Log1p = self {
            values.mapv_inplace(f64::ln_1p);
        }
    }
}

/// Options for building a matrix from response-level data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatrixOptions {
    pub pooling: Pooling,
    pub mode: AggregationMode,
    pub transform: ActivationTransform,
}

impl Default for MatrixOptions {
    fn default() -> Self {
        Self {
            pooling: Pooling::Mean,
            mode: AggregationMode::Raw,
            transform: ActivationTransform::Log1p,
        }
    }
}

/// Pooled matrix as stored on disk
#[derive(Debug, Deserialize)]
struct MatrixFile {
    roles: Vec<String>,
    #[serde(default = "default_pooling")]
    pooling: Pooling,
    features: Vec<Vec<f64>>,
}

fn default_pooling() -> Pooling {
    Pooling::Mean
}

/// `[R roles, F features]` activation matrix with a validated role index
#[derive(Debug, Clone)]
pub struct RoleFeatureMatrix {
    roles: Vec<String>,
    role_index: HashMap<String, usize>,
    /// Analysis values: transformed and, if requested, question-centered
    values: Array2<f64>,
    /// Untransformed pooled activations
    raw: Array2<f64>,
    options: MatrixOptions,
}

impl RoleFeatureMatrix {
    /// Wrap already-pooled role rows. Values are used as given (raw mode,
    /// identity transform).
    pub fn new(roles: Vec<String>, pooled: Array2<f64>, pooling: Pooling) -> Result<Self> {
        let options = MatrixOptions {
            pooling,
            mode: AggregationMode::Raw,
            transform: ActivationTransform::Identity,
        };
        Self::from_parts(roles, pooled.clone(), pooled, options)
    }

    /// Wrap already-pooled role rows and apply an activation transform
    pub fn with_transform(
        roles: Vec<String>,
        pooled: Array2<f64>,
        pooling: Pooling,
        transform: ActivationTransform,
    ) -> Result<Self> {
        let mut values = pooled.clone();
        transform.apply(&mut values);
        let options = MatrixOptions {
            pooling,
            mode: AggregationMode::Raw,
            transform,
        };
        Self::from_parts(roles, values, pooled, options)
    }

    fn from_parts(
        roles: Vec<String>,
        values: Array2<f64>,
        raw: Array2<f64>,
        options: MatrixOptions,
    ) -> Result<Self> {
        if roles.is_empty() {
            return Err(AtlasError::InvalidInput("role catalog is empty".into()));
        }
        ensure_dim("role rows", roles.len(), values.nrows())?;
        ensure_dim("raw role rows", roles.len(), raw.nrows())?;
        ensure_dim("raw feature width", values.ncols(), raw.ncols())?;
        if values.ncols() == 0 {
            return Err(AtlasError::InvalidInput("feature width is zero".into()));
        }
        if raw.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(AtlasError::InvalidInput(
                "pooled activations must be finite and non-negative".into(),
            ));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(AtlasError::InvalidInput(
                "analysis values must be finite".into(),
            ));
        }

        let mut role_index = HashMap::with_capacity(roles.len());
        for (i, role) in roles.iter().enumerate() {
            if role_index.insert(role.clone(), i).is_some() {
                return Err(AtlasError::InvalidInput(format!("duplicate role '{role}'")));
            }
        }

        Ok(Self {
            roles,
            role_index,
            values,
            raw,
            options,
        })
    }

    /// Aggregate response-level activations into one row per role.
    ///
    /// In `QuestionCentered` mode every role must carry question ids. For
    /// each question answered by all roles, responses are pooled per
    /// (question, role), transformed, and the cross-role mean of that
    /// question is subtracted. A role's value row is the mean residual over
    /// those questions.
    pub fn from_responses(corpus: &ResponseCorpus, options: MatrixOptions) -> Result<Self> {
        let n_roles = corpus.len();
        let n_features = corpus.n_features();
        let roles: Vec<String> = corpus.roles().iter().map(|r| r.role().to_string()).collect();

        let mut raw = Array2::<f64>::zeros((n_roles, n_features));
        for (i, role) in corpus.roles().iter().enumerate() {
            raw.row_mut(i).assign(&role.pooled(options.pooling));
        }

        let values = match options.mode {
            AggregationMode::Raw => {
                let mut values = raw.clone();
                options.transform.apply(&mut values);
                values
            }
            AggregationMode::QuestionCentered => question_centered(corpus, options)?,
        };

        info!(
            "Role matrix: {} roles x {} features ({:?} pooling, {:?}, {:?})",
            n_roles, n_features, options.pooling, options.mode, options.transform
        );

        Self::from_parts(roles, values, raw, options)
    }

    /// Load a pooled matrix from JSON: `{"roles": [...], "pooling": "mean", "features": [[...]]}`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: MatrixFile = serde_json::from_str(&content)?;
        let n_roles = file.features.len();
        let width = file.features.first().map_or(0, Vec::len);
        let mut flat = Vec::with_capacity(n_roles * width);
        for (i, row) in file.features.into_iter().enumerate() {
            ensure_dim(&format!("feature width of row {i}"), width, row.len())?;
            flat.extend(row);
        }
        let pooled = Array2::from_shape_vec((n_roles, width), flat)
            .map_err(|e| AtlasError::InvalidInput(e.to_string()))?;
        Self::new(file.roles, pooled, file.pooling)
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    pub fn n_roles(&self) -> usize {
        self.roles.len()
    }

    pub fn n_features(&self) -> usize {
        self.values.ncols()
    }

    /// Row position of a role
    pub fn role_index(&self, role: &str) -> Option<usize> {
        self.role_index.get(role).copied()
    }

    /// Row position of a role, failing when absent
    pub fn require_role(&self, role: &str) -> Result<usize> {
        self.role_index(role)
            .ok_or_else(|| AtlasError::MissingRole(role.to_string()))
    }

    /// Analysis values `[R, F]`
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// Untransformed pooled activations `[R, F]`
    pub fn raw(&self) -> &Array2<f64> {
        &self.raw
    }

    /// Role profile of one feature (a column of the analysis values)
    pub fn feature_profile(&self, feature: usize) -> ArrayView1<'_, f64> {
        self.values.column(feature)
    }

    /// Analysis values restricted to the given feature columns `[R, K]`
    pub fn select_features(&self, features: &[usize]) -> Array2<f64> {
        self.values.select(Axis(1), features)
    }

    pub fn options(&self) -> MatrixOptions {
        self.options
    }

    pub fn pooling(&self) -> Pooling {
        self.options.pooling
    }

    pub fn mode(&self) -> AggregationMode {
        self.options.mode
    }

    /// Reject a vector width that disagrees with this matrix
    pub fn ensure_width(&self, context: &str, width: usize) -> Result<()> {
        ensure_dim(context, self.n_features(), width)
    }
}

fn question_centered(corpus: &ResponseCorpus, options: MatrixOptions) -> Result<Array2<f64>> {
    let n_roles = corpus.len();
    let n_features = corpus.n_features();

    // Questions answered by every role
    let mut common: Option<BTreeSet<usize>> = None;
    for role in corpus.roles() {
        let ids = role.question_ids().ok_or_else(|| {
            AtlasError::InvalidInput(format!(
                "question-centering requires question ids for role '{}'",
                role.role()
            ))
        })?;
        let set: BTreeSet<usize> = ids.iter().copied().collect();
        common = Some(match common {
            None => set,
            Some(acc) => acc.intersection(&set).copied().collect(),
        });
    }
    let questions: Vec<usize> = common.unwrap_or_default().into_iter().collect();
    if questions.is_empty() {
        return Err(AtlasError::InvalidInput(
            "question-centering found no question shared by all roles".into(),
        ));
    }
    debug!("Question-centering over {} shared questions", questions.len());

    let mut residual_sum = Array2::<f64>::zeros((n_roles, n_features));
    let mut per_question = Array2::<f64>::zeros((n_roles, n_features));
    for &question in &questions {
        for (r, role) in corpus.roles().iter().enumerate() {
            let rows = role.rows_for_question(question);
            let mut pooled = pool_rows(role.activations(), &rows, options.pooling)?;
            options.transform.apply(&mut pooled);
            per_question.row_mut(r).assign(&pooled);
        }
        let question_mean = per_question
            .mean_axis(Axis(0))
            .ok_or_else(|| AtlasError::InvalidInput("no roles to center".into()))?;
        for (r, row) in per_question.rows().into_iter().enumerate() {
            let mut target = residual_sum.row_mut(r);
            target += &row;
            target -= &question_mean;
        }
    }

    Ok(residual_sum / questions.len() as f64)
}
