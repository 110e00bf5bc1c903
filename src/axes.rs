//! Scoring axes for skill radars.
//!
//! An axis is a named skill dimension ("communication", "problem_solving")
//! scored 0-100. Axes are versioned in the store: deactivating a key and
//! inserting a new row supersedes the old record while historical scores keep
//! referencing the identity they were written against. The engine always
//! works from the *active* set resolved at operation time.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Versioned axis identity, as persisted. Scores reference this, not the key.
pub type AxisId = i64;

/// One active axis record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisDef {
    pub id: AxisId,
    /// Stable key, unique within the active set.
    pub key: String,
    /// Human display label.
    pub label: String,
    pub locale: String,
}

/// The active axis set: insertion-ordered (catalog order) with O(1) key
/// lookup. Catalog order drives sanitizer backfill, so it is part of the
/// contract, not an implementation detail.
#[derive(Debug, Clone, Default)]
pub struct ActiveAxes {
    axes: Vec<AxisDef>,
    index: HashMap<String, usize>,
}

impl ActiveAxes {
    /// Build from an ordered list of definitions. If the same key appears
    /// twice the first occurrence wins; later ones are dropped.
    pub fn from_defs(defs: Vec<AxisDef>) -> Self {
        let mut axes = Vec::with_capacity(defs.len());
        let mut index = HashMap::with_capacity(defs.len());
        for def in defs {
            if index.contains_key(&def.key) {
                continue;
            }
            index.insert(def.key.clone(), axes.len());
            axes.push(def);
        }
        Self { axes, index }
    }

    pub fn get(&self, key: &str) -> Option<&AxisDef> {
        self.index.get(key).map(|&i| &self.axes[i])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Catalog-order iteration.
    pub fn iter(&self) -> impl Iterator<Item = &AxisDef> {
        self.axes.iter()
    }

    pub fn defs(&self) -> &[AxisDef] {
        &self.axes
    }

    pub fn len(&self) -> usize {
        self.axes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }
}

/// Fixed vocabulary the heuristic scorer falls back to when no catalog is
/// configured at all. Deliberately generic internship skills.
pub const FALLBACK_AXIS_KEYS: [(&str, &str); 6] = [
    ("communication", "Communication"),
    ("teamwork", "Teamwork"),
    ("problem_solving", "Problem Solving"),
    ("initiative", "Initiative"),
    ("adaptability", "Adaptability"),
    ("technical_foundation", "Technical Foundation"),
];

/// Default catalog seed used by the CLI for fresh stores. Eight axes so a
/// sanitized radar has headroom between the lower and upper bounds.
pub fn default_axis_seed() -> Vec<(&'static str, &'static str)> {
    vec![
        ("communication", "Communication"),
        ("teamwork", "Teamwork"),
        ("problem_solving", "Problem Solving"),
        ("initiative", "Initiative"),
        ("adaptability", "Adaptability"),
        ("technical_foundation", "Technical Foundation"),
        ("attention_to_detail", "Attention to Detail"),
        ("time_management", "Time Management"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(id: AxisId, key: &str) -> AxisDef {
        AxisDef {
            id,
            key: key.into(),
            label: key.to_uppercase(),
            locale: "en".into(),
        }
    }

    #[test]
    fn from_defs_preserves_order_and_dedups() {
        let axes = ActiveAxes::from_defs(vec![def(1, "a"), def(2, "b"), def(3, "a"), def(4, "c")]);
        let keys: Vec<&str> = axes.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(axes.get("a").unwrap().id, 1, "first occurrence wins");
    }

    #[test]
    fn lookup_hits_and_misses() {
        let axes = ActiveAxes::from_defs(vec![def(1, "a")]);
        assert!(axes.contains("a"));
        assert!(!axes.contains("z"));
        assert!(axes.get("z").is_none());
    }

    #[test]
    fn fallback_vocabulary_covers_minimum_cardinality() {
        assert_eq!(FALLBACK_AXIS_KEYS.len(), crate::radar::MIN_AXES);
    }
}
