//! Schema normalization: mapping raw, shape-ambiguous conversation
//! documents to [`ConversationRecord`].
//!
//! Four participant encodings coexist in storage. Extraction unions every
//! candidate field rather than stopping at the first match: partially
//! migrated documents routinely carry data in more than one field at
//! once, and first-match would silently lose participants.
//!
//! Everything in this module is pure and deterministic; no I/O.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;
use toit_store::Document;

use crate::record::ConversationRecord;

/// Modern participant-id array field.
pub const MODERN_PARTICIPANTS: &str = "participant_ids";
/// Transitional participant array field.
pub const TRANSITIONAL_PARTICIPANTS: &str = "participants";
/// Legacy discrete single-participant fields.
pub const LEGACY_PARTICIPANT_ONE: &str = "participant1_id";
pub const LEGACY_PARTICIPANT_TWO: &str = "participant2_id";

/// Activity timestamp fields, in priority order: the modern combined field
/// first, then the legacy one.
const ACTIVITY_FIELDS: [&str; 2] = ["last_message_at", "updated_at"];

/// Preview text aliases, in priority order.
const PREVIEW_TEXT_FIELDS: [&str; 4] = ["last_message", "last_message_text", "text", "content"];

/// Message-type fields consulted when no text alias yields a preview.
const MESSAGE_TYPE_FIELDS: [&str; 2] = ["last_message_type", "type"];

const UNREAD_FIELD: &str = "unread_counts";

/// Normalize one raw conversation document.
///
/// Returns `None` when fewer than two valid participant ids survive
/// filtering; such a record cannot be merged or displayed.
pub fn normalize(doc: &Document) -> Option<ConversationRecord> {
    let participant_ids = participant_ids(&doc.fields);
    if participant_ids.len() < 2 {
        return None;
    }

    Some(ConversationRecord {
        id: doc.id.clone(),
        participant_ids,
        preview_text: preview_text(&doc.fields),
        last_activity_at: activity_timestamp(&doc.fields),
        unread_counts: unread_counts(&doc.fields),
    })
}

/// Union of every participant encoding, filtered and deduplicated.
pub fn participant_ids(fields: &Value) -> Vec<String> {
    let mut ids = BTreeSet::new();

    for name in [MODERN_PARTICIPANTS, TRANSITIONAL_PARTICIPANTS] {
        if let Some(items) = fields.get(name).and_then(Value::as_array) {
            for item in items {
                if let Some(id) = item.as_str() {
                    if is_valid_participant(id) {
                        ids.insert(id.to_string());
                    }
                }
            }
        }
    }

    for name in [LEGACY_PARTICIPANT_ONE, LEGACY_PARTICIPANT_TWO] {
        if let Some(id) = fields.get(name).and_then(Value::as_str) {
            if is_valid_participant(id) {
                ids.insert(id.to_string());
            }
        }
    }

    ids.into_iter().collect()
}

/// Sentinel tokens leak out of clients that stringified missing values.
fn is_valid_participant(id: &str) -> bool {
    let id = id.trim();
    !id.is_empty()
        && !id.eq_ignore_ascii_case("undefined")
        && !id.eq_ignore_ascii_case("null")
        && !id.eq_ignore_ascii_case("nan")
}

/// Decode one timestamp value to epoch milliseconds.
///
/// Accepts a plain numeric epoch, an object carrying a numeric `millis`
/// member, or an object carrying a `seconds` component (converted ×1000).
pub fn timestamp_ms(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::Object(map) => {
            if let Some(ms) = map.get("millis").and_then(Value::as_i64) {
                Some(ms)
            } else {
                map.get("seconds").and_then(Value::as_i64).map(|s| s * 1000)
            }
        }
        _ => None,
    }
}

/// First decodable timestamp among `names`, tried in order.
pub fn first_timestamp(fields: &Value, names: &[&str]) -> Option<i64> {
    names.iter().find_map(|n| fields.get(n).and_then(timestamp_ms))
}

/// The conversation's most recent activity, epoch milliseconds.
pub fn activity_timestamp(fields: &Value) -> Option<i64> {
    first_timestamp(fields, &ACTIVITY_FIELDS)
}

/// Extract a preview: the first non-empty text alias, else a label derived
/// from the message type, else absent.
pub fn preview_text(fields: &Value) -> Option<String> {
    for name in PREVIEW_TEXT_FIELDS {
        if let Some(text) = fields.get(name).and_then(Value::as_str) {
            if !text.trim().is_empty() {
                return Some(text.to_string());
            }
        }
    }

    for name in MESSAGE_TYPE_FIELDS {
        if let Some(label) = fields.get(name).and_then(Value::as_str).and_then(type_label) {
            return Some(label.to_string());
        }
    }

    None
}

fn type_label(kind: &str) -> Option<&'static str> {
    match kind.to_ascii_lowercase().as_str() {
        "audio" | "voice" => Some("Voice message"),
        "image" => Some("Image"),
        "file" => Some("File"),
        "location" => Some("Location"),
        _ => None,
    }
}

fn unread_counts(fields: &Value) -> Option<HashMap<String, u32>> {
    let map = fields.get(UNREAD_FIELD)?.as_object()?;
    let counts: HashMap<String, u32> = map
        .iter()
        .filter_map(|(user, count)| {
            count
                .as_u64()
                .map(|n| (user.clone(), n.min(u64::from(u32::MAX)) as u32))
        })
        .collect();
    if counts.is_empty() {
        None
    } else {
        Some(counts)
    }
}
