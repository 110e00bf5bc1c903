//! Prompt templates for radar generation and chat refinement.
//!
//! Domain logic for rendering scoring prompts. Provider-agnostic.

use serde_json::{json, Value};

use crate::axes::ActiveAxes;
use crate::gateway::Message;
use crate::radar::{Radar, MAX_AXES, MIN_AXES};
use crate::role::{RoleAnswer, RoleContext};

/// Escape XML special characters to prevent prompt injection via tag breaking.
fn escape_xml_chars(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn axis_lines(axes: &ActiveAxes) -> String {
    axes.iter()
        .map(|a| format!("- {}: {}", a.key, escape_xml_chars(&a.label)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn answer_block(answers: &[RoleAnswer]) -> String {
    answers
        .iter()
        .map(|a| {
            format!(
                "<answer slug=\"{}\">\n{}\n</answer>",
                escape_xml_chars(&a.slug),
                escape_xml_chars(a.text.trim())
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|i| format!("- {}", escape_xml_chars(i.trim())))
        .collect::<Vec<_>>()
        .join("\n")
}

fn role_block(role: &RoleContext) -> String {
    format!(
        "<role>\n<title>{}</title>\n<description>{}</description>\n<responsibilities>\n{}\n</responsibilities>\n<requirements>\n{}\n</requirements>\n</role>",
        escape_xml_chars(&role.title),
        escape_xml_chars(role.description.trim()),
        bullet_list(&role.responsibilities),
        bullet_list(&role.requirements),
    )
}

fn radar_summary(radar: &Radar) -> String {
    radar
        .iter()
        .map(|e| format!("- {}: {}", e.axis_key, e.score_0_100))
        .collect::<Vec<_>>()
        .join("\n")
}

// =============================================================================
// Initial generation
// =============================================================================

const GENERATION_SYSTEM: &str = r#"You are an expert talent assessor. Given a role description and the role owner's questionnaire answers, you score the role's skill expectations on a fixed set of axes.

Score each axis from 0 to 100 based on how demanding the role is on that axis. Use the questionnaire answers as evidence; when an answer says nothing about an axis, infer a moderate score from the role description rather than guessing extremes.

Output only valid JSON of this shape:
{"scores": [{"axis_key": "...", "score_0_100": 70, "confidence_0_1": 0.8, "reason": "one sentence"}]}

Score every listed axis exactly once, using only the listed axis keys."#;

/// Build the messages for the initial radar generation call.
pub fn generation_messages(
    role: &RoleContext,
    answers: &[RoleAnswer],
    axes: &ActiveAxes,
) -> Vec<Message> {
    let user = format!(
        "Score this role on the following axes.\n\n<axes>\n{}\n</axes>\n\n{}\n\n<questionnaire>\n{}\n</questionnaire>\n\nReturn a JSON object with your scores.\njson:",
        axis_lines(axes),
        role_block(role),
        answer_block(answers),
    );

    vec![Message::system(GENERATION_SYSTEM), Message::user(user)]
}

/// JSON schema constraining the generation response.
pub fn generation_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "scores": {
                "type": "array",
                "minItems": MIN_AXES,
                "maxItems": MAX_AXES,
                "items": {
                    "type": "object",
                    "properties": {
                        "axis_key": {"type": "string"},
                        "score_0_100": {"type": "integer", "minimum": 0, "maximum": 100},
                        "confidence_0_1": {"type": "number", "minimum": 0, "maximum": 1},
                        "reason": {"type": "string"}
                    },
                    "required": ["axis_key", "score_0_100"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["scores"],
        "additionalProperties": false
    })
}

// =============================================================================
// Chat refinement
// =============================================================================

const REFINEMENT_SYSTEM: &str = r#"You are helping a role owner refine their role's skill radar through conversation. The user describes what should change; you adjust scores accordingly and explain what you did in one or two sentences.

Keep every axis from the current radar unless the user asks otherwise. Scores are integers from 0 to 100.

Output only valid JSON of this shape:
{"reply": "what changed and why", "radar": {"rationale": "one sentence", "axes": [{"axis_key": "...", "score_0_100": 70, "confidence_0_1": 0.8, "reason": "one sentence"}]}}"#;

/// Build the messages for a chat refinement turn.
///
/// `history` is the prior conversation in order, oldest first; the final
/// element must be the user's current message.
pub fn refinement_messages(
    role: &RoleContext,
    axes: &ActiveAxes,
    radar: &Radar,
    history: &[Message],
) -> Vec<Message> {
    let context = format!(
        "{}\n\n<axes>\n{}\n</axes>\n\n<current_radar>\n{}\n</current_radar>",
        role_block(role),
        axis_lines(axes),
        radar_summary(radar),
    );

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(REFINEMENT_SYSTEM));
    messages.push(Message::user(context));
    messages.extend(history.iter().cloned());
    messages
}

/// JSON schema constraining the refinement response.
pub fn refinement_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "reply": {"type": "string"},
            "radar": {
                "type": "object",
                "properties": {
                    "rationale": {"type": "string"},
                    "axes": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "axis_key": {"type": "string"},
                                "score_0_100": {"type": "integer", "minimum": 0, "maximum": 100},
                                "confidence_0_1": {"type": "number", "minimum": 0, "maximum": 1},
                                "reason": {"type": "string"}
                            },
                            "required": ["axis_key", "score_0_100"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["rationale", "axes"],
                "additionalProperties": false
            }
        },
        "required": ["reply", "radar"],
        "additionalProperties": false
    })
}
