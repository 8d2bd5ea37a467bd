//! Conversation traces supplied for drift analysis
//!
//! One pooled feature vector per assistant turn, plus optional per-token
//! vectors for turns that need token localization. Turn indices must be
//! strictly increasing and every vector must share one width.

use std::path::Path;

use ndarray::{Array1, Array2};
use serde::Deserialize;

use crate::error::{ensure_dim, AtlasError, Result};

/// Per-token activations of one turn `[n_tokens, F]`
#[derive(Debug, Clone)]
pub struct TokenActivations {
    tokens: Vec<String>,
    activations: Array2<f64>,
}

impl TokenActivations {
    pub fn new(tokens: Vec<String>, activations: Array2<f64>) -> Result<Self> {
        ensure_dim("token rows", tokens.len(), activations.nrows())?;
        if activations.iter().any(|v| !v.is_finite()) {
            return Err(AtlasError::InvalidInput(
                "token activations must be finite".into(),
            ));
        }
        Ok(Self {
            tokens,
            activations,
        })
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn activations(&self) -> &Array2<f64> {
        &self.activations
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// One assistant turn
#[derive(Debug, Clone)]
pub struct TurnActivations {
    pub turn: usize,
    /// Pooled feature vector `[F]`
    pub activations: Array1<f64>,
    pub tokens: Option<TokenActivations>,
}

impl TurnActivations {
    pub fn new(turn: usize, activations: Array1<f64>) -> Self {
        Self {
            turn,
            activations,
            tokens: None,
        }
    }

    pub fn with_tokens(mut self, tokens: TokenActivations) -> Self {
        self.tokens = Some(tokens);
        self
    }
}

#[derive(Debug, Deserialize)]
struct TokenEntry {
    tokens: Vec<String>,
    activations: Vec<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
struct TurnEntry {
    turn: usize,
    activations: Vec<f64>,
    #[serde(default)]
    tokens: Option<TokenEntry>,
}

/// Raw JSON structure for loading
#[derive(Debug, Deserialize)]
struct TraceFile {
    #[serde(default)]
    conversation_id: Option<String>,
    turns: Vec<TurnEntry>,
}

/// Ordered assistant turns of one conversation
#[derive(Debug, Clone)]
pub struct ConversationTrace {
    id: Option<String>,
    turns: Vec<TurnActivations>,
}

impl ConversationTrace {
    pub fn new(id: Option<String>, turns: Vec<TurnActivations>) -> Result<Self> {
        let width = turns.first().map(|t| t.activations.len());
        for (i, turn) in turns.iter().enumerate() {
            if let Some(width) = width {
                ensure_dim(
                    &format!("feature width of turn {}", turn.turn),
                    width,
                    turn.activations.len(),
                )?;
                if let Some(tokens) = &turn.tokens {
                    ensure_dim(
                        &format!("token feature width of turn {}", turn.turn),
                        width,
                        tokens.activations().ncols(),
                    )?;
                }
            }
            if turn.activations.iter().any(|v| !v.is_finite()) {
                return Err(AtlasError::InvalidInput(format!(
                    "turn {} has non-finite activations",
                    turn.turn
                )));
            }
            if i > 0 && turn.turn <= turns[i - 1].turn {
                return Err(AtlasError::InvalidInput(format!(
                    "turn indices must be strictly increasing: {} follows {}",
                    turn.turn,
                    turns[i - 1].turn
                )));
            }
        }
        Ok(Self { id, turns })
    }

    /// Load a trace from JSON:
    /// `{"conversation_id": "...", "turns": [{"turn": 0, "activations": [...],
    /// "tokens": {"tokens": [...], "activations": [[...], ...]}}]}`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let file: TraceFile = serde_json::from_str(content)?;
        let mut turns = Vec::with_capacity(file.turns.len());
        for entry in file.turns {
            let turn_width = entry.activations.len();
            let mut turn = TurnActivations::new(entry.turn, Array1::from(entry.activations));
            if let Some(tokens) = entry.tokens {
                let width = tokens.activations.first().map_or(turn_width, Vec::len);
                let n_tokens = tokens.activations.len();
                let mut flat = Vec::with_capacity(n_tokens * width);
                for (i, row) in tokens.activations.into_iter().enumerate() {
                    ensure_dim(&format!("token {i} width in turn {}", entry.turn), width, row.len())?;
                    flat.extend(row);
                }
                let activations = Array2::from_shape_vec((n_tokens, width), flat)
                    .map_err(|e| AtlasError::InvalidInput(e.to_string()))?;
                turn = turn.with_tokens(TokenActivations::new(tokens.tokens, activations)?);
            }
            turns.push(turn);
        }
        Self::new(file.conversation_id, turns)
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn turns(&self) -> &[TurnActivations] {
        &self.turns
    }

    /// Feature width, `None` for an empty trace
    pub fn n_features(&self) -> Option<usize> {
        self.turns.first().map(|t| t.activations.len())
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
