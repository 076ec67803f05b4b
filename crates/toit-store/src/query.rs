//! Query model: the predicate surface supported by the backend.
//!
//! Only simple equality, array membership, single-field ordering and a
//! result limit exist; anything richer requires a composite index the
//! deployment may or may not have, which surfaces as
//! [`StoreError::MissingIndex`](crate::StoreError::MissingIndex).

use serde_json::Value;

/// A query against one collection or sub-collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Slash-joined path segments, e.g. `conversations` or
    /// `conversations/<id>/messages`.
    pub collection: String,
    pub filter: Option<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `field == value`
    FieldEquals { field: String, value: Value },
    /// `value` is an element of the array stored under `field`.
    ArrayContains { field: String, value: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl Query {
    /// Start a query over all documents of a collection.
    pub fn collection(path: impl Into<String>) -> Self {
        Self {
            collection: path.into(),
            filter: None,
            order_by: None,
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter = Some(Filter::FieldEquals {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn where_array_contains(
        mut self,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.filter = Some(Filter::ArrayContains {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Fields this query filters or orders on, i.e. the index surface it
    /// needs from the backend.
    pub fn indexed_fields(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        match &self.filter {
            Some(Filter::FieldEquals { field, .. }) | Some(Filter::ArrayContains { field, .. }) => {
                fields.push(field.as_str());
            }
            None => {}
        }
        if let Some(order) = &self.order_by {
            fields.push(order.field.as_str());
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_composes() {
        let query = Query::collection("conversations")
            .where_eq("participant1_id", "u1")
            .order_by("updated_at", Direction::Descending)
            .limit(50);

        assert_eq!(query.collection, "conversations");
        assert_eq!(
            query.filter,
            Some(Filter::FieldEquals {
                field: "participant1_id".into(),
                value: json!("u1"),
            })
        );
        assert_eq!(query.limit, Some(50));
        assert_eq!(query.indexed_fields(), vec!["participant1_id", "updated_at"]);
    }

    #[test]
    fn indexed_fields_empty_for_bare_scan() {
        let query = Query::collection("conversations/c1/messages").limit(10);
        assert!(query.indexed_fields().is_empty());
    }
}
