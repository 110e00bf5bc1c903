//! Radar types and the sanitizer.
//!
//! `sanitize` is the single gate between untrusted scoring data (AI output,
//! client-submitted working radars, heuristic entries) and everything
//! downstream. It is total: any input list against a non-empty axis set
//! produces a structurally valid radar. Nothing in this crate persists or
//! returns a radar that has not passed through it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::axes::ActiveAxes;

/// Lower bound on radar cardinality (backfilled from the catalog if needed).
pub const MIN_AXES: usize = 6;
/// Upper bound on radar cardinality (excess input is silently ignored).
pub const MAX_AXES: usize = 10;
/// Neutral score for synthetic backfill entries.
pub const DEFAULT_BACKFILL_SCORE: u8 = 60;

/// One scored axis in a radar.
///
/// Optional fields stay `None` when the source data did not provide them;
/// the sanitizer never invents values for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadarEntry {
    pub axis_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub score_0_100: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_required_0_100: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_0_1: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight_0_1: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

/// An ordered, bounded set of scored axes. Always the output of [`sanitize`].
pub type Radar = Vec<RadarEntry>;

/// Serialize radar entries back to raw values, e.g. to re-sanitize a
/// client-supplied working radar through the same gate as AI output.
pub fn radar_to_values(radar: &[RadarEntry]) -> Vec<Value> {
    radar
        .iter()
        .map(|e| serde_json::to_value(e).unwrap_or(Value::Null))
        .collect()
}

/// Normalize an arbitrary list of candidate entries into a valid radar.
///
/// Contract:
/// - input order is preserved; the first occurrence of an axis key wins and
///   later duplicates are dropped, not merged
/// - entries with a missing, empty, or unknown `axis_key` are dropped
/// - `score_0_100` (falling back to `score`) is rounded and clamped to
///   [0, 100]; failed numeric coercion scores 0
/// - optional fields are clamped when present and omitted when absent;
///   legacy `weight_0_5` is rescaled to `weight_0_1`
/// - collection stops at [`MAX_AXES`]; if fewer than [`MIN_AXES`] entries
///   survive, the catalog is walked in order appending synthetic entries at
///   [`DEFAULT_BACKFILL_SCORE`] until the bound or the catalog is exhausted
///
/// Idempotent: sanitizing a sanitized radar against the same axis set
/// returns it unchanged.
pub fn sanitize(raw: &[Value], axes: &ActiveAxes) -> Radar {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut out: Radar = Vec::new();

    for item in raw {
        if out.len() >= MAX_AXES {
            break;
        }
        let Some(obj) = item.as_object() else {
            continue;
        };
        let Some(key) = obj
            .get("axis_key")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|k| !k.is_empty())
        else {
            continue;
        };
        let Some(def) = axes.get(key) else {
            continue;
        };
        if !seen.insert(&def.key) {
            continue;
        }

        let score = obj
            .get("score_0_100")
            .or_else(|| obj.get("score"))
            .and_then(coerce_number)
            .map(|v| v.round().clamp(0.0, 100.0) as u8)
            .unwrap_or(0);

        let min_required = obj
            .get("min_required_0_100")
            .and_then(coerce_number)
            .map(|v| v.round().clamp(0.0, 100.0) as u8);

        let confidence = obj
            .get("confidence_0_1")
            .and_then(coerce_number)
            .map(|v| v.clamp(0.0, 1.0));

        let weight = obj
            .get("weight_0_1")
            .and_then(coerce_number)
            .map(|v| v.clamp(0.0, 1.0))
            .or_else(|| {
                obj.get("weight_0_5")
                    .and_then(coerce_number)
                    .map(|v| (v / 5.0).clamp(0.0, 1.0))
            });

        let rationale = obj
            .get("rationale")
            .or_else(|| obj.get("reason"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);

        out.push(RadarEntry {
            axis_key: def.key.clone(),
            label: Some(def.label.clone()),
            score_0_100: score,
            min_required_0_100: min_required,
            confidence_0_1: confidence,
            weight_0_1: weight,
            rationale,
        });
    }

    if out.len() < MIN_AXES {
        for def in axes.iter() {
            if out.len() >= MIN_AXES {
                break;
            }
            if seen.contains(def.key.as_str()) {
                continue;
            }
            out.push(RadarEntry {
                axis_key: def.key.clone(),
                label: Some(def.label.clone()),
                score_0_100: DEFAULT_BACKFILL_SCORE,
                min_required_0_100: None,
                confidence_0_1: None,
                weight_0_1: None,
                rationale: None,
            });
        }
    }

    out.truncate(MAX_AXES);
    out
}

/// Coerce a JSON value to a finite f64. Numbers pass through; numeric
/// strings are parsed; everything else fails.
fn coerce_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axes::AxisDef;
    use serde_json::json;

    fn catalog(keys: &[&str]) -> ActiveAxes {
        ActiveAxes::from_defs(
            keys.iter()
                .enumerate()
                .map(|(i, k)| AxisDef {
                    id: i as i64 + 1,
                    key: (*k).into(),
                    label: k.to_uppercase(),
                    locale: "en".into(),
                })
                .collect(),
        )
    }

    #[test]
    fn empty_input_backfills_whole_catalog() {
        let axes = catalog(&["a", "b", "c", "d", "e", "f"]);
        let radar = sanitize(&[], &axes);
        assert_eq!(radar.len(), 6);
        for (entry, def) in radar.iter().zip(axes.iter()) {
            assert_eq!(entry.axis_key, def.key, "backfill follows catalog order");
            assert_eq!(entry.score_0_100, DEFAULT_BACKFILL_SCORE);
            assert!(entry.rationale.is_none());
            assert!(entry.confidence_0_1.is_none());
        }
    }

    #[test]
    fn excess_valid_input_truncates_to_max_in_input_order() {
        let keys = ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l"];
        let axes = catalog(&keys);
        let raw: Vec<Value> = keys
            .iter()
            .enumerate()
            .map(|(i, k)| json!({ "axis_key": k, "score_0_100": i * 5 }))
            .collect();
        let radar = sanitize(&raw, &axes);
        assert_eq!(radar.len(), MAX_AXES);
        for (i, entry) in radar.iter().enumerate() {
            assert_eq!(entry.axis_key, keys[i]);
            assert_eq!(entry.score_0_100, (i * 5) as u8, "scores unchanged");
        }
    }

    #[test]
    fn duplicate_key_first_occurrence_wins() {
        let axes = catalog(&["a", "b", "c", "d", "e", "f"]);
        let raw = vec![
            json!({ "axis_key": "a", "score_0_100": 10 }),
            json!({ "axis_key": "a", "score_0_100": 90 }),
        ];
        let radar = sanitize(&raw, &axes);
        assert_eq!(radar[0].axis_key, "a");
        assert_eq!(radar[0].score_0_100, 10);
        assert_eq!(radar.iter().filter(|e| e.axis_key == "a").count(), 1);
    }

    #[test]
    fn garbage_items_are_dropped_not_fatal() {
        let axes = catalog(&["a", "b", "c", "d", "e", "f"]);
        let raw = vec![
            json!(null),
            json!(42),
            json!("nope"),
            json!([1, 2, 3]),
            json!({ "axis_key": "  " }),
            json!({ "axis_key": "unknown", "score_0_100": 50 }),
            json!({ "score_0_100": 50 }),
            json!({ "axis_key": "a", "score_0_100": "not a number" }),
        ];
        let radar = sanitize(&raw, &axes);
        assert_eq!(radar.len(), MIN_AXES);
        assert_eq!(radar[0].axis_key, "a");
        assert_eq!(radar[0].score_0_100, 0, "failed coercion scores zero");
    }

    #[test]
    fn scores_are_clamped_and_coerced() {
        let axes = catalog(&["a", "b", "c", "d", "e", "f"]);
        let raw = vec![
            json!({ "axis_key": "a", "score_0_100": 250 }),
            json!({ "axis_key": "b", "score_0_100": -5 }),
            json!({ "axis_key": "c", "score": "72.6" }),
            json!({ "axis_key": "d", "score_0_100": 33.4, "confidence_0_1": 1.7 }),
            json!({ "axis_key": "e", "score_0_100": 50, "weight_0_5": 4 }),
            json!({ "axis_key": "f", "score_0_100": 50, "min_required_0_100": "120" }),
        ];
        let radar = sanitize(&raw, &axes);
        assert_eq!(radar[0].score_0_100, 100);
        assert_eq!(radar[1].score_0_100, 0);
        assert_eq!(radar[2].score_0_100, 73, "string score coerced, rounded");
        assert_eq!(radar[3].score_0_100, 33);
        assert_eq!(radar[3].confidence_0_1, Some(1.0));
        assert_eq!(radar[4].weight_0_1, Some(0.8), "legacy weight rescaled");
        assert_eq!(radar[5].min_required_0_100, Some(100));
    }

    #[test]
    fn real_entries_take_priority_over_backfill() {
        let axes = catalog(&["a", "b", "c", "d", "e", "f", "g", "h"]);
        let raw = vec![
            json!({ "axis_key": "g", "score_0_100": 88 }),
            json!({ "axis_key": "h", "score_0_100": 11 }),
        ];
        let radar = sanitize(&raw, &axes);
        assert_eq!(radar.len(), MIN_AXES);
        assert_eq!(radar[0].axis_key, "g");
        assert_eq!(radar[1].axis_key, "h");
        // Backfill picks up from catalog start, skipping present keys.
        let rest: Vec<&str> = radar[2..].iter().map(|e| e.axis_key.as_str()).collect();
        assert_eq!(rest, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn sanitize_is_idempotent() {
        let axes = catalog(&["a", "b", "c", "d", "e", "f", "g", "h"]);
        let raw = vec![
            json!({ "axis_key": "c", "score_0_100": 81, "confidence_0_1": 0.4,
                    "rationale": "strong signal", "weight_0_5": 3 }),
            json!({ "axis_key": "a", "score": "55" }),
        ];
        let once = sanitize(&raw, &axes);
        let twice = sanitize(&radar_to_values(&once), &axes);
        assert_eq!(once, twice);
    }

    #[test]
    fn small_catalog_bounds_the_radar_below_min() {
        let axes = catalog(&["a", "b", "c"]);
        let radar = sanitize(&[], &axes);
        assert_eq!(radar.len(), 3, "catalog exhaustion caps backfill");
    }

    #[test]
    fn empty_rationale_is_omitted() {
        let axes = catalog(&["a", "b", "c", "d", "e", "f"]);
        let raw = vec![json!({ "axis_key": "a", "score_0_100": 50, "rationale": "   " })];
        let radar = sanitize(&raw, &axes);
        assert!(radar[0].rationale.is_none());
    }
}
