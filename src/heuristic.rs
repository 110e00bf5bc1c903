//! Deterministic fallback scorer.
//!
//! Produces a full raw radar from questionnaire text alone, so the pipeline
//! always has something valid to sanitize and persist when the AI call is
//! unavailable, refused, or unparseable. Intentionally coarse: the score is a
//! function of total answer volume, nothing more.

use serde_json::{json, Value};

use crate::axes::{ActiveAxes, FALLBACK_AXIS_KEYS};
use crate::radar::MAX_AXES;
use crate::role::RoleAnswer;

/// Confidence attached to every heuristic entry.
pub const HEURISTIC_CONFIDENCE: f64 = 0.55;
/// Fixed rationale identifying heuristic entries in stored radars.
pub const HEURISTIC_RATIONALE: &str =
    "Estimated from questionnaire answer volume; AI scoring was not available.";

/// Score every axis from the total length of non-empty answers.
///
/// `base = clamp(55 + min(40, chars / 80), 30, 100)`. One entry per active
/// axis in catalog order (up to [`MAX_AXES`]); a fixed vocabulary stands in
/// only when the catalog is empty. Pure and deterministic: identical input
/// always yields identical entries.
pub fn heuristic_radar(answers: &[RoleAnswer], axes: &ActiveAxes) -> Vec<Value> {
    let char_count: usize = answers
        .iter()
        .map(|a| a.text.trim())
        .filter(|t| !t.is_empty())
        .map(|t| t.chars().count())
        .sum();

    let bonus = (char_count / 80).min(40) as i64;
    let base = (55 + bonus).clamp(30, 100);

    let entry = |key: &str| {
        json!({
            "axis_key": key,
            "score_0_100": base,
            "confidence_0_1": HEURISTIC_CONFIDENCE,
            "rationale": HEURISTIC_RATIONALE,
        })
    };

    if axes.is_empty() {
        return FALLBACK_AXIS_KEYS.iter().map(|(key, _)| entry(key)).collect();
    }

    axes.iter()
        .take(MAX_AXES)
        .map(|def| entry(&def.key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axes::AxisDef;

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

    fn score_of(entries: &[Value]) -> i64 {
        entries[0]["score_0_100"].as_i64().unwrap()
    }

    #[test]
    fn empty_answers_score_base_55() {
        let axes = catalog(&["a", "b", "c", "d", "e", "f"]);
        let entries = heuristic_radar(&[], &axes);
        assert_eq!(entries.len(), 6);
        assert_eq!(score_of(&entries), 55);
    }

    #[test]
    fn answer_volume_raises_score_with_cap() {
        let axes = catalog(&["a", "b", "c", "d", "e", "f"]);
        let mid = vec![RoleAnswer::new("q1", "x".repeat(800))];
        assert_eq!(score_of(&heuristic_radar(&mid, &axes)), 65);

        let huge = vec![RoleAnswer::new("q1", "x".repeat(100_000))];
        assert_eq!(score_of(&heuristic_radar(&huge, &axes)), 95, "bonus caps at 40");
    }

    #[test]
    fn whitespace_only_answers_do_not_count() {
        let axes = catalog(&["a", "b", "c", "d", "e", "f"]);
        let answers = vec![
            RoleAnswer::new("q1", "   \n\t  "),
            RoleAnswer::new("q2", "x".repeat(160)),
        ];
        assert_eq!(score_of(&heuristic_radar(&answers, &axes)), 57);
    }

    #[test]
    fn deterministic_for_identical_input() {
        let axes = catalog(&["a", "b", "c", "d", "e", "f", "g"]);
        let answers = vec![
            RoleAnswer::new("q1", "We ship a Rust service with weekly releases."),
            RoleAnswer::new("q2", "Interns pair daily with a mentor."),
        ];
        let first = heuristic_radar(&answers, &axes);
        let second = heuristic_radar(&answers, &axes);
        assert_eq!(first, second);
    }

    #[test]
    fn empty_catalog_uses_fallback_vocabulary() {
        let entries = heuristic_radar(&[], &ActiveAxes::default());
        let keys: Vec<&str> = entries
            .iter()
            .map(|e| e["axis_key"].as_str().unwrap())
            .collect();
        let expected: Vec<&str> = FALLBACK_AXIS_KEYS.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn large_catalog_is_capped() {
        let keys: Vec<String> = (0..15).map(|i| format!("k{i}")).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let axes = catalog(&refs);
        assert_eq!(heuristic_radar(&[], &axes).len(), MAX_AXES);
    }
}
