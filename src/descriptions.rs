//! Optional feature-id → description / url lookup
//!
//! An immutable key-value collaborator passed explicitly into selection.
//! Absence of a feature (or of the whole lookup) is never an error.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;

/// Description attached to one feature. Both fields are optional; empty
/// strings are normalized to `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureDescription {
    pub description: Option<String>,
    pub url: Option<String>,
}

impl FeatureDescription {
    pub fn is_empty(&self) -> bool {
        self.description.is_none() && self.url.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DescriptionLookup {
    entries: HashMap<usize, FeatureDescription>,
}

impl DescriptionLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a cache file. Accepted shapes:
    ///
    /// - `[{"feature_id": 12, "description": "...", "url": "..."}, ...]`
    /// - `{"12": {"description": "...", "url": "..."}, "13": "plain text"}`
    ///
    /// Entries with unusable ids are skipped. Any other top-level shape is
    /// logged and yields an empty lookup.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let lookup = Self::from_json_str(&content)?;
        debug!(
            "Loaded {} feature descriptions from {}",
            lookup.len(),
            path.display()
        );
        Ok(lookup)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let payload: Value = serde_json::from_str(content)?;
        let mut entries = HashMap::new();

        match payload {
            Value::Array(items) => {
                for item in items {
                    let Value::Object(map) = item else { continue };
                    let Some(id) = map.get("feature_id").and_then(coerce_feature_id) else {
                        continue;
                    };
                    entries.insert(
                        id,
                        FeatureDescription {
                            description: map.get("description").and_then(coerce_text),
                            url: map.get("url").and_then(coerce_text),
                        },
                    );
                }
            }
            Value::Object(map) => {
                for (key, value) in map {
                    let Some(id) = parse_id_str(&key) else { continue };
                    let entry = match value {
                        Value::Object(inner) => FeatureDescription {
                            description: inner.get("description").and_then(coerce_text),
                            url: inner.get("url").and_then(coerce_text),
                        },
                        Value::String(_) => FeatureDescription {
                            description: coerce_text(&value),
                            url: None,
                        },
                        _ => continue,
                    };
                    entries.insert(id, entry);
                }
            }
            other => {
                warn!(
                    "Description cache must be a list or an object, got {}",
                    json_kind(&other)
                );
            }
        }

        Ok(Self { entries })
    }

    pub fn get(&self, feature_id: usize) -> Option<&FeatureDescription> {
        self.entries.get(&feature_id)
    }

    pub fn insert(&mut self, feature_id: usize, description: FeatureDescription) {
        self.entries.insert(feature_id, description);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn coerce_feature_id(raw: &Value) -> Option<usize> {
    match raw {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                usize::try_from(i).ok()
            } else if let Some(u) = n.as_u64() {
                usize::try_from(u).ok()
            } else {
                n.as_f64()
                    .filter(|f| f.is_finite() && *f >= 0.0)
                    .map(|f| f.trunc() as usize)
            }
        }
        Value::String(s) => parse_id_str(s),
        _ => None,
    }
}

fn parse_id_str(s: &str) -> Option<usize> {
    s.trim()
        .parse::<i64>()
        .ok()
        .and_then(|i| usize::try_from(i).ok())
}

fn coerce_text(raw: &Value) -> Option<String> {
    let trimmed = raw.as_str()?.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_payload() {
        let lookup = DescriptionLookup::from_json_str(
            r#"[
                {"feature_id": 7, "description": "  pirate speech ", "url": "https://x/7"},
                {"feature_id": "8", "description": ""},
                {"feature_id": -1, "description": "dropped"},
                {"description": "no id"},
                "not an object"
            ]"#,
        )
        .unwrap();
        assert_eq!(lookup.len(), 2);
        let seven = lookup.get(7).unwrap();
        assert_eq!(seven.description.as_deref(), Some("pirate speech"));
        assert_eq!(seven.url.as_deref(), Some("https://x/7"));
        assert!(lookup.get(8).unwrap().is_empty());
    }

    #[test]
    fn test_map_payload() {
        let lookup = DescriptionLookup::from_json_str(
            r#"{"3": {"description": "formal tone", "url": null},
                "4": "refusals",
                "x": "bad key",
                "5": 12}"#,
        )
        .unwrap();
        assert_eq!(lookup.len(), 2);
        assert_eq!(lookup.get(3).unwrap().description.as_deref(), Some("formal tone"));
        assert_eq!(lookup.get(4).unwrap().description.as_deref(), Some("refusals"));
        assert!(lookup.get(4).unwrap().url.is_none());
        assert!(lookup.get(5).is_none());
    }

    #[test]
    fn test_unexpected_shape_is_empty() {
        let lookup = DescriptionLookup::from_json_str("42").unwrap();
        assert!(lookup.is_empty());
    }
}
