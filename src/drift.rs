//! Assistant-axis drift: turn scoring, transition attribution and token
//! localization
//!
//! Every operation is a pure function of the axis, the config and the trace.
//! A trace whose feature width disagrees with the axis is rejected before
//! any computation.

use ndarray::ArrayView1;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::axis::{AssistantAxis, AxisMetadata};
use crate::config::{DriftConfig, TokenNormalization};
use crate::error::{ensure_dim, Result};
use crate::trace::{ConversationTrace, TurnActivations};

/// Note attached to every report about truncated share lists
pub const SHARES_NOTE: &str = "share_of_change and share_of_away are computed over all \
nonzero-delta features before top-N truncation; listed shares need not sum to 1.";

/// Direction a feature's change pushes the turn score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    TowardAssistant,
    AwayFromAssistant,
}

/// Change of one feature between consecutive turns
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureDelta {
    pub feature_id: usize,
    pub prev_value: f64,
    pub value: f64,
    pub delta: f64,
    /// `delta × a_hat[feature]`
    pub contrib: f64,
    pub effect: Effect,
    /// `|delta| / Σ|delta|` over all nonzero-delta features
    pub share_of_change: f64,
    /// `max(-contrib, 0) / Σ max(-contrib, 0)`
    pub share_of_away: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub prev_turn: usize,
    pub turn: usize,
    /// `s_turn - s_prev`
    pub delta_score: f64,
    /// Top-N features with `delta > 0`, largest `|delta|` first
    pub activated: Vec<FeatureDelta>,
    /// Top-N features with `delta < 0`, largest `|delta|` first
    pub deactivated: Vec<FeatureDelta>,
    /// `Σ max(-contrib, 0)`
    pub away_mass: f64,
    /// `Σ max(contrib, 0)`
    pub toward_mass: f64,
    pub nonzero_delta_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TurnScore {
    pub turn: usize,
    pub score: f64,
}

/// Per-token axis projections of one turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenLocalization {
    pub turn: usize,
    pub tokens: Vec<String>,
    pub projection_values: Vec<f64>,
    /// Turn-local normalization of `projection_values`
    pub normalized_values: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    pub conversation_id: Option<String>,
    pub axis: AxisMetadata,
    pub token_normalization: TokenNormalization,
    pub turn_scores: Vec<TurnScore>,
    pub transitions: Vec<Transition>,
    pub token_localization: Vec<TokenLocalization>,
    pub shares_note: String,
}

/// Drift analysis against a fixed assistant axis
#[derive(Debug, Clone)]
pub struct DriftScorer<'a> {
    axis: &'a AssistantAxis,
    config: DriftConfig,
}

impl<'a> DriftScorer<'a> {
    pub fn new(axis: &'a AssistantAxis, config: DriftConfig) -> Self {
        Self { axis, config }
    }

    pub fn axis(&self) -> &AssistantAxis {
        self.axis
    }

    fn check_trace(&self, trace: &ConversationTrace) -> Result<()> {
        if let Some(width) = trace.n_features() {
            ensure_dim("trace feature width", self.axis.dim(), width)?;
        }
        Ok(())
    }

    /// `s_t = x_t · a_hat` for every turn, in turn order
    pub fn score_turns(&self, trace: &ConversationTrace) -> Result<Vec<TurnScore>> {
        self.check_trace(trace)?;
        trace
            .turns()
            .iter()
            .map(|t| {
                Ok(TurnScore {
                    turn: t.turn,
                    score: self.axis.project(t.activations.view())?,
                })
            })
            .collect()
    }

    /// Every nonzero-delta feature between two turn vectors, with shares
    /// computed over the full set (feature order)
    pub fn feature_deltas(
        &self,
        prev: ArrayView1<'_, f64>,
        now: ArrayView1<'_, f64>,
    ) -> Result<Vec<FeatureDelta>> {
        ensure_dim("previous turn width", self.axis.dim(), prev.len())?;
        ensure_dim("turn width", self.axis.dim(), now.len())?;
        let a_hat = self.axis.direction();

        let mut deltas: Vec<FeatureDelta> = (0..now.len())
            .filter_map(|j| {
                let delta = now[j] - prev[j];
                if delta == 0.0 {
                    return None;
                }
                let contrib = delta * a_hat[j];
                Some(FeatureDelta {
                    feature_id: j,
                    prev_value: prev[j],
                    value: now[j],
                    delta,
                    contrib,
                    effect: if contrib >= 0.0 {
                        Effect::TowardAssistant
                    } else {
                        Effect::AwayFromAssistant
                    },
                    share_of_change: 0.0,
                    share_of_away: 0.0,
                })
            })
            .collect();

        let change_total: f64 = deltas.iter().map(|d| d.delta.abs()).sum();
        let away_total: f64 = deltas.iter().map(|d| (-d.contrib).max(0.0)).sum();
        for d in &mut deltas {
            d.share_of_change = if change_total > 0.0 {
                d.delta.abs() / change_total
            } else {
                0.0
            };
            let away = (-d.contrib).max(0.0);
            d.share_of_away = if away > 0.0 && away_total > 0.0 {
                away / away_total
            } else {
                0.0
            };
        }
        Ok(deltas)
    }

    /// Attribute the score change between two consecutive turns
    pub fn decompose(&self, prev: &TurnActivations, now: &TurnActivations) -> Result<Transition> {
        let deltas = self.feature_deltas(prev.activations.view(), now.activations.view())?;
        let s_prev = self.axis.project(prev.activations.view())?;
        let s_now = self.axis.project(now.activations.view())?;

        let toward_mass: f64 = deltas.iter().map(|d| d.contrib.max(0.0)).sum();
        let away_mass: f64 = deltas.iter().map(|d| (-d.contrib).max(0.0)).sum();
        let nonzero_delta_count = deltas.len();

        let (mut activated, mut deactivated): (Vec<_>, Vec<_>) =
            deltas.into_iter().partition(|d| d.delta > 0.0);
        for list in [&mut activated, &mut deactivated] {
            list.sort_by(|a, b| {
                b.delta
                    .abs()
                    .total_cmp(&a.delta.abs())
                    .then(a.feature_id.cmp(&b.feature_id))
            });
            list.truncate(self.config.top_n);
        }

        debug!(
            "Transition {} -> {}: {} nonzero deltas, toward {:.4}, away {:.4}",
            prev.turn, now.turn, nonzero_delta_count, toward_mass, away_mass
        );
        Ok(Transition {
            prev_turn: prev.turn,
            turn: now.turn,
            delta_score: s_now - s_prev,
            activated,
            deactivated,
            away_mass,
            toward_mass,
            nonzero_delta_count,
        })
    }

    /// Per-token projections of a turn; `None` when the turn has no tokens
    pub fn localize(&self, turn: &TurnActivations) -> Result<Option<TokenLocalization>> {
        let Some(tokens) = &turn.tokens else {
            return Ok(None);
        };
        ensure_dim("token feature width", self.axis.dim(), tokens.activations().ncols())?;
        let projection_values: Vec<f64> = tokens
            .activations()
            .rows()
            .into_iter()
            .map(|row| row.dot(&self.axis.direction()))
            .collect();
        let normalized_values =
            normalize_token_values(&projection_values, self.config.token_normalization);
        Ok(Some(TokenLocalization {
            turn: turn.turn,
            tokens: tokens.tokens().to_vec(),
            projection_values,
            normalized_values,
        }))
    }

    /// Full drift report for one conversation
    pub fn analyze(&self, trace: &ConversationTrace) -> Result<DriftReport> {
        let turn_scores = self.score_turns(trace)?;
        let transitions = trace
            .turns()
            .windows(2)
            .map(|pair| self.decompose(&pair[0], &pair[1]))
            .collect::<Result<Vec<_>>>()?;
        let mut token_localization = Vec::new();
        for turn in trace.turns() {
            if let Some(loc) = self.localize(turn)? {
                token_localization.push(loc);
            }
        }

        info!(
            "Drift for {}: {} turns, {} transitions, {} localized turns",
            trace.id().unwrap_or("<unnamed>"),
            turn_scores.len(),
            transitions.len(),
            token_localization.len()
        );
        Ok(DriftReport {
            conversation_id: trace.id().map(str::to_string),
            axis: self.axis.metadata().clone(),
            token_normalization: self.config.token_normalization,
            turn_scores,
            transitions,
            token_localization,
            shares_note: SHARES_NOTE.to_string(),
        })
    }

    /// Analyze independent conversations in parallel, one result each
    pub fn analyze_many(&self, traces: &[ConversationTrace]) -> Vec<Result<DriftReport>> {
        traces.par_iter().map(|t| self.analyze(t)).collect()
    }
}

/// Normalize one turn's token projections.
///
/// `SignedMaxAbs` divides by the largest magnitude (range `[-1, 1]`, sign
/// kept); `MinMax` maps to `[0, 1]`. An all-zero or constant turn maps to
/// zeros. Scaling is turn-local, so equal raw values in different turns can
/// normalize differently.
pub fn normalize_token_values(values: &[f64], mode: TokenNormalization) -> Vec<f64> {
    match mode {
        TokenNormalization::SignedMaxAbs => {
            let max_abs = values.iter().fold(0.0f64, |m, v| m.max(v.abs()));
            if max_abs > 0.0 {
                values.iter().map(|v| v / max_abs).collect()
            } else {
                vec![0.0; values.len()]
            }
        }
        TokenNormalization::MinMax => {
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let range = max - min;
            if range > 0.0 {
                values.iter().map(|v| (v - min) / range).collect()
            } else {
                vec![0.0; values.len()]
            }
        }
    }
}
