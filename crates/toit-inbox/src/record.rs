//! Canonical conversation representation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One inbox entry, derived from a raw conversation document.
///
/// Records are recomputed from the backend documents on every source
/// update and discarded on unsubscribe; they are a read-side projection
/// and are never written back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    pub id: String,

    /// Deduplicated, sorted participant user ids. Always at least two
    /// entries; documents that normalize to fewer are dropped entirely.
    pub participant_ids: Vec<String>,

    /// Short summary of the most recent message, when the conversation
    /// document carries one. Absent previews may later be filled in by
    /// enrichment.
    pub preview_text: Option<String>,

    /// Most recent update or message time, epoch milliseconds.
    pub last_activity_at: Option<i64>,

    /// Per-user unread counters.
    pub unread_counts: Option<HashMap<String, u32>>,
}

impl ConversationRecord {
    /// Sort key for the inbox: newest first, records without any recorded
    /// activity sort as oldest.
    pub fn sort_stamp(&self) -> i64 {
        self.last_activity_at.unwrap_or(0)
    }
}
