//! Response-level feature activations per role
//!
//! Each role carries an `[n_responses, F]` array of per-response pooled
//! activations, optionally tagged with the question and instruction variant
//! that produced each response. This is the input to matrix aggregation,
//! question-centering and split-half stability.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::config::StabilitySplit;
use crate::error::{ensure_dim, AtlasError, Result};
use crate::matrix::Pooling;

/// One response's activations as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRecord {
    #[serde(default)]
    pub question_id: Option<usize>,
    #[serde(default)]
    pub variant_id: Option<usize>,
    pub activations: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct RoleEntry {
    role: String,
    responses: Vec<ResponseRecord>,
}

/// Raw JSON structure for loading
#[derive(Debug, Deserialize)]
struct ResponseFile {
    roles: Vec<RoleEntry>,
}

/// All responses of one role
#[derive(Debug, Clone)]
pub struct RoleResponses {
    role: String,
    activations: Array2<f64>,
    question_ids: Option<Vec<usize>>,
    variant_ids: Option<Vec<usize>>,
}

impl RoleResponses {
    /// Wrap an `[n_responses, F]` activation array
    pub fn new(role: impl Into<String>, activations: Array2<f64>) -> Result<Self> {
        let role = role.into();
        if activations.nrows() == 0 {
            return Err(AtlasError::InvalidInput(format!(
                "role '{role}' has no responses"
            )));
        }
        if activations.ncols() == 0 {
            return Err(AtlasError::InvalidInput(format!(
                "role '{role}' has zero-width activations"
            )));
        }
        if activations.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(AtlasError::InvalidInput(format!(
                "role '{role}' has negative or non-finite activations"
            )));
        }
        Ok(Self {
            role,
            activations,
            question_ids: None,
            variant_ids: None,
        })
    }

    /// Attach the question id of every response
    pub fn with_question_ids(mut self, ids: Vec<usize>) -> Result<Self> {
        ensure_dim(
            &format!("question ids of role '{}'", self.role),
            self.n_responses(),
            ids.len(),
        )?;
        self.question_ids = Some(ids);
        Ok(self)
    }

    /// Attach the instruction-variant id of every response
    pub fn with_variant_ids(mut self, ids: Vec<usize>) -> Result<Self> {
        ensure_dim(
            &format!("variant ids of role '{}'", self.role),
            self.n_responses(),
            ids.len(),
        )?;
        self.variant_ids = Some(ids);
        Ok(self)
    }

    /// Build from deserialized records; ids must be given for all or none
    pub fn from_records(role: impl Into<String>, records: Vec<ResponseRecord>) -> Result<Self> {
        let role = role.into();
        let n = records.len();
        let width = records.first().map_or(0, |r| r.activations.len());

        let question_ids = collect_ids(&role, "question_id", records.iter().map(|r| r.question_id))?;
        let variant_ids = collect_ids(&role, "variant_id", records.iter().map(|r| r.variant_id))?;

        let mut flat = Vec::with_capacity(n * width);
        for (i, record) in records.into_iter().enumerate() {
            ensure_dim(
                &format!("activation width of response {i} of role '{role}'"),
                width,
                record.activations.len(),
            )?;
            flat.extend(record.activations);
        }
        let activations = Array2::from_shape_vec((n, width), flat)
            .map_err(|e| AtlasError::InvalidInput(format!("role '{role}': {e}")))?;

        let mut responses = Self::new(role, activations)?;
        if let Some(ids) = question_ids {
            responses = responses.with_question_ids(ids)?;
        }
        if let Some(ids) = variant_ids {
            responses = responses.with_variant_ids(ids)?;
        }
        Ok(responses)
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn activations(&self) -> &Array2<f64> {
        &self.activations
    }

    pub fn question_ids(&self) -> Option<&[usize]> {
        self.question_ids.as_deref()
    }

    pub fn variant_ids(&self) -> Option<&[usize]> {
        self.variant_ids.as_deref()
    }

    pub fn n_responses(&self) -> usize {
        self.activations.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.activations.ncols()
    }

    /// Pool all responses into one role vector
    pub fn pooled(&self, pooling: Pooling) -> Array1<f64> {
        let all: Vec<usize> = (0..self.n_responses()).collect();
        // Non-empty by construction
        pool_rows(&self.activations, &all, pooling).unwrap_or_else(|_| Array1::zeros(0))
    }

    /// Row indices of the responses answering `question`
    pub fn rows_for_question(&self, question: usize) -> Vec<usize> {
        self.question_ids
            .as_deref()
            .map(|ids| {
                ids.iter()
                    .enumerate()
                    .filter(|(_, &q)| q == question)
                    .map(|(i, _)| i)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Split response rows into two disjoint, non-empty halves
    pub fn split_halves(
        &self,
        split: StabilitySplit,
        rng: &mut StdRng,
    ) -> Result<(Vec<usize>, Vec<usize>)> {
        match split {
            StabilitySplit::RandomHalves => {
                let n = self.n_responses();
                if n < 2 {
                    return Err(AtlasError::InvalidInput(format!(
                        "need at least 2 responses for split-half stability: {}",
                        self.role
                    )));
                }
                let mut indices: Vec<usize> = (0..n).collect();
                indices.shuffle(rng);
                let midpoint = n / 2;
                let second = indices.split_off(midpoint);
                Ok((indices, second))
            }
            StabilitySplit::VariantGroups => {
                let ids = self.variant_ids.as_deref().ok_or_else(|| {
                    AtlasError::InvalidInput(format!(
                        "role '{}' has no variant ids for variant-group stability",
                        self.role
                    ))
                })?;
                let distinct: Vec<usize> = ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
                if distinct.len() < 2 {
                    return Err(AtlasError::InvalidInput(format!(
                        "need at least 2 instruction variants for split-half stability: {}",
                        self.role
                    )));
                }
                let even: HashSet<usize> = distinct.iter().step_by(2).copied().collect();
                let (a, b): (Vec<usize>, Vec<usize>) =
                    (0..ids.len()).partition(|&i| even.contains(&ids[i]));
                Ok((a, b))
            }
        }
    }
}

fn collect_ids(
    role: &str,
    field: &str,
    ids: impl Iterator<Item = Option<usize>>,
) -> Result<Option<Vec<usize>>> {
    let ids: Vec<Option<usize>> = ids.collect();
    let present = ids.iter().filter(|id| id.is_some()).count();
    if present == 0 {
        Ok(None)
    } else if present == ids.len() {
        Ok(Some(ids.into_iter().flatten().collect()))
    } else {
        Err(AtlasError::InvalidInput(format!(
            "role '{role}': {field} given for {present} of {} responses",
            ids.len()
        )))
    }
}

/// Pool a subset of rows by mean or elementwise max
pub fn pool_rows(activations: &Array2<f64>, rows: &[usize], pooling: Pooling) -> Result<Array1<f64>> {
    if rows.is_empty() {
        return Err(AtlasError::InvalidInput("cannot pool zero responses".into()));
    }
    let selected = activations.select(Axis(0), rows);
    let pooled = match pooling {
        Pooling::Mean => selected
            .mean_axis(Axis(0))
            .ok_or_else(|| AtlasError::InvalidInput("cannot pool zero responses".into()))?,
        Pooling::Max => selected.fold_axis(Axis(0), f64::NEG_INFINITY, |&acc, &v| acc.max(v)),
    };
    Ok(pooled)
}

/// Collection of response sets for every role
#[derive(Debug, Clone)]
pub struct ResponseCorpus {
    roles: Vec<RoleResponses>,
}

impl ResponseCorpus {
    /// Validate that roles are unique and share one feature width
    pub fn new(roles: Vec<RoleResponses>) -> Result<Self> {
        let first = roles
            .first()
            .ok_or_else(|| AtlasError::InvalidInput("response corpus has no roles".into()))?;
        let width = first.n_features();
        let mut seen = HashSet::new();
        for role in &roles {
            ensure_dim(
                &format!("feature width of role '{}'", role.role()),
                width,
                role.n_features(),
            )?;
            if !seen.insert(role.role().to_string()) {
                return Err(AtlasError::InvalidInput(format!(
                    "duplicate role '{}'",
                    role.role()
                )));
            }
        }
        Ok(Self { roles })
    }

    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let file: ResponseFile = serde_json::from_str(content)?;
        let roles = file
            .roles
            .into_iter()
            .map(|entry| RoleResponses::from_records(entry.role, entry.responses))
            .collect::<Result<Vec<_>>>()?;
        Self::new(roles)
    }

    pub fn roles(&self) -> &[RoleResponses] {
        &self.roles
    }

    pub fn get(&self, role: &str) -> Option<&RoleResponses> {
        self.roles.iter().find(|r| r.role() == role)
    }

    pub fn n_features(&self) -> usize {
        self.roles.first().map_or(0, RoleResponses::n_features)
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}
