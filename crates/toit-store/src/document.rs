//! Raw document representation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One stored document: an opaque, collection-unique id plus a schema-free
/// field map.
///
/// The store never enforces a schema; partially migrated documents carrying
/// several generations of field layouts at once are normal and must be
/// tolerated by every consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Value) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Convenience accessor for a top-level field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}
