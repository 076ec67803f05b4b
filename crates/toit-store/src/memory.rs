//! In-memory [`DocumentStore`] used for local development and tests.
//!
//! Semantics mirror the hosted backend where it matters to consumers:
//! ordering on a field excludes documents that do not carry that field
//! (index semantics), and a query touching a field marked via
//! [`MemoryStore::fail_field`] fails with [`StoreError::MissingIndex`].

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::client::{DocumentStore, Subscription, WatchHandle, WatchSnapshot};
use crate::document::Document;
use crate::error::{Result, StoreError};
use crate::query::{Direction, Filter, Query};

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Vec<Document>>,
    watches: Vec<WatchState>,
    failing_fields: Vec<String>,
}

struct WatchState {
    query: Query,
    tx: mpsc::UnboundedSender<WatchSnapshot>,
    handle: WatchHandle,
}

/// Thread-safe in-memory document store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document with a generated id; returns the id.
    pub fn add(&self, collection: &str, fields: Value) -> String {
        let id = Uuid::new_v4().to_string();
        self.upsert(collection, Document::new(id.clone(), fields));
        id
    }

    /// Insert or replace a document by id, then notify live watches.
    pub fn upsert(&self, collection: &str, doc: Document) {
        let mut inner = self.lock();
        let docs = inner.collections.entry(collection.to_string()).or_default();
        match docs.iter_mut().find(|d| d.id == doc.id) {
            Some(existing) => *existing = doc,
            None => docs.push(doc),
        }
        notify(&mut inner, collection);
    }

    /// Delete a document by id, then notify live watches. Returns whether
    /// a document was removed.
    pub fn remove(&self, collection: &str, id: &str) -> bool {
        let mut inner = self.lock();
        let removed = match inner.collections.get_mut(collection) {
            Some(docs) => {
                let before = docs.len();
                docs.retain(|d| d.id != id);
                docs.len() != before
            }
            None => false,
        };
        if removed {
            notify(&mut inner, collection);
        }
        removed
    }

    /// Mark a field so any query filtering or ordering on it fails with
    /// [`StoreError::MissingIndex`].
    pub fn fail_field(&self, field: &str) {
        self.lock().failing_fields.push(field.to_string());
    }

    /// Number of registered watches whose receiver is still open. Lets
    /// tests verify that subscribers release their streams on teardown.
    pub fn open_watch_count(&self) -> usize {
        self.lock()
            .watches
            .iter()
            .filter(|w| !w.tx.is_closed())
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn fetch(&self, query: &Query) -> Result<Vec<Document>> {
        let inner = self.lock();
        evaluate(&inner.collections, &inner.failing_fields, query)
    }

    fn watch(&self, query: &Query) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = WatchHandle::new();

        let mut inner = self.lock();
        let initial = evaluate(&inner.collections, &inner.failing_fields, query);
        let _ = tx.send(initial);
        inner.watches.push(WatchState {
            query: query.clone(),
            tx,
            handle: handle.clone(),
        });

        Ok(Subscription {
            snapshots: rx,
            handle,
        })
    }
}

/// Re-evaluate and push every live watch on `collection`, pruning dead
/// subscriptions along the way.
fn notify(inner: &mut Inner, collection: &str) {
    let Inner {
        collections,
        watches,
        failing_fields,
    } = inner;

    watches.retain(|w| w.handle.is_active() && !w.tx.is_closed());
    for watch in watches.iter() {
        if watch.query.collection != collection {
            continue;
        }
        let snapshot = evaluate(collections, failing_fields, &watch.query);
        let _ = watch.tx.send(snapshot);
    }
}

fn evaluate(
    collections: &HashMap<String, Vec<Document>>,
    failing_fields: &[String],
    query: &Query,
) -> Result<Vec<Document>> {
    for field in query.indexed_fields() {
        if failing_fields.iter().any(|f| f == field) {
            return Err(StoreError::MissingIndex(field.to_string()));
        }
    }

    let mut docs: Vec<Document> = collections
        .get(&query.collection)
        .map(|docs| {
            docs.iter()
                .filter(|d| matches(d, query.filter.as_ref()))
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    if let Some(order) = &query.order_by {
        // Index semantics: documents without the ordered field drop out.
        docs.retain(|d| d.field(&order.field).is_some());
        docs.sort_by(|a, b| {
            let ord = compare_values(a.field(&order.field), b.field(&order.field));
            match order.direction {
                Direction::Ascending => ord,
                Direction::Descending => ord.reverse(),
            }
        });
    }

    if let Some(limit) = query.limit {
        docs.truncate(limit);
    }
    Ok(docs)
}

fn matches(doc: &Document, filter: Option<&Filter>) -> bool {
    match filter {
        None => true,
        Some(Filter::FieldEquals { field, value }) => doc.field(field) == Some(value),
        Some(Filter::ArrayContains { field, value }) => doc
            .field(field)
            .and_then(Value::as_array)
            .map(|items| items.contains(value))
            .unwrap_or(false),
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seed(store: &MemoryStore) {
        store.upsert(
            "conversations",
            Document::new("c1", json!({"participant1_id": "u1", "updated_at": 100})),
        );
        store.upsert(
            "conversations",
            Document::new("c2", json!({"participant1_id": "u2", "updated_at": 300})),
        );
        store.upsert(
            "conversations",
            Document::new("c3", json!({"participant_ids": ["u1", "u3"], "updated_at": 200})),
        );
    }

    #[tokio::test]
    async fn add_generates_a_unique_id() {
        let store = MemoryStore::new();
        let id = store.add("conversations", json!({"participant1_id": "u1"}));
        let other = store.add("conversations", json!({"participant1_id": "u1"}));
        assert_ne!(id, other);

        let docs = store
            .fetch(&Query::collection("conversations"))
            .await
            .unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[tokio::test]
    async fn fetch_filters_by_equality() {
        let store = MemoryStore::new();
        seed(&store);

        let docs = store
            .fetch(&Query::collection("conversations").where_eq("participant1_id", "u1"))
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "c1");
    }

    #[tokio::test]
    async fn fetch_filters_by_array_membership() {
        let store = MemoryStore::new();
        seed(&store);

        let docs = store
            .fetch(&Query::collection("conversations").where_array_contains("participant_ids", "u1"))
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "c3");
    }

    #[tokio::test]
    async fn ordering_excludes_documents_missing_the_field() {
        let store = MemoryStore::new();
        seed(&store);
        store.upsert("conversations", Document::new("c4", json!({"participant1_id": "u9"})));

        let docs = store
            .fetch(
                &Query::collection("conversations").order_by("updated_at", Direction::Descending),
            )
            .await
            .unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["c2", "c3", "c1"]);
    }

    #[tokio::test]
    async fn limit_truncates() {
        let store = MemoryStore::new();
        seed(&store);

        let docs = store
            .fetch(
                &Query::collection("conversations")
                    .order_by("updated_at", Direction::Ascending)
                    .limit(2),
            )
            .await
            .unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "c1");
    }

    #[tokio::test]
    async fn failing_field_yields_missing_index() {
        let store = MemoryStore::new();
        seed(&store);
        store.fail_field("participant1_id");

        let err = store
            .fetch(&Query::collection("conversations").where_eq("participant1_id", "u1"))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::MissingIndex("participant1_id".into()));
    }

    #[tokio::test]
    async fn watch_pushes_initial_and_updated_snapshots() {
        let store = MemoryStore::new();
        seed(&store);

        let mut sub = store
            .watch(&Query::collection("conversations").where_eq("participant1_id", "u1"))
            .unwrap();

        let initial = sub.snapshots.recv().await.unwrap().unwrap();
        assert_eq!(initial.len(), 1);

        store.upsert(
            "conversations",
            Document::new("c9", json!({"participant1_id": "u1"})),
        );
        let updated = sub.snapshots.recv().await.unwrap().unwrap();
        assert_eq!(updated.len(), 2);
    }

    #[tokio::test]
    async fn unsubscribe_stops_deliveries() {
        let store = MemoryStore::new();
        seed(&store);

        let mut sub = store.watch(&Query::collection("conversations")).unwrap();
        let _ = sub.snapshots.recv().await.unwrap();

        sub.handle.unsubscribe();
        store.upsert(
            "conversations",
            Document::new("c9", json!({"participant1_id": "u1"})),
        );

        // The watch was pruned; the sender side is gone.
        assert!(sub.snapshots.recv().await.is_none());
    }

    #[tokio::test]
    async fn open_watch_count_tracks_dropped_receivers() {
        let store = MemoryStore::new();
        let sub = store.watch(&Query::collection("conversations")).unwrap();
        assert_eq!(store.open_watch_count(), 1);

        drop(sub);
        assert_eq!(store.open_watch_count(), 0);
    }

    #[tokio::test]
    async fn remove_notifies_watchers() {
        let store = MemoryStore::new();
        seed(&store);

        let mut sub = store.watch(&Query::collection("conversations")).unwrap();
        let initial = sub.snapshots.recv().await.unwrap().unwrap();
        assert_eq!(initial.len(), 3);

        assert!(store.remove("conversations", "c2"));
        let updated = sub.snapshots.recv().await.unwrap().unwrap();
        assert_eq!(updated.len(), 2);
    }
}
