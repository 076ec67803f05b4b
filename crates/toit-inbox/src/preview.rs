//! On-demand recovery of message previews.
//!
//! Conversations normalized without a preview get one by reading the most
//! recent document of their `messages` sub-collection. Message documents
//! are as shape-ambiguous as conversations, so the lookup falls back
//! across query shapes: newest by the modern timestamp field, newest by
//! the legacy one, then a bounded unordered read. Results are cached per
//! conversation keyed on the activity stamp, so repeated merges with
//! unchanged data never re-issue a lookup.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use toit_store::{Direction, Document, DocumentStore, Query};

use crate::normalize;

/// Message sub-collection timestamp fields, in fallback order.
const MESSAGE_TIME_FIELDS: [&str; 2] = ["created_at", "timestamp"];

/// Outcome of one preview lookup. Absent fields mean "no message yet" —
/// never an error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreviewInfo {
    pub text: Option<String>,
    pub last_activity_at: Option<i64>,
}

impl PreviewInfo {
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.last_activity_at.is_none()
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    /// The conversation's `last_activity_at` (or 0) when this preview was
    /// fetched. A changed stamp invalidates the entry.
    stamp: i64,
    info: PreviewInfo,
}

/// Per-engine-instance preview resolver. Shares the engine's lifetime;
/// the cache is bounded by inbox size and discarded at teardown.
pub struct PreviewResolver {
    store: Arc<dyn DocumentStore>,
    scan_limit: usize,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl PreviewResolver {
    pub fn new(store: Arc<dyn DocumentStore>, scan_limit: usize) -> Self {
        Self {
            store,
            scan_limit,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the preview for one conversation, reusing the cached result
    /// when the activity stamp is unchanged.
    pub async fn resolve(&self, conversation_id: &str, stamp: i64) -> PreviewInfo {
        if let Some(entry) = self.cache.lock().await.get(conversation_id) {
            if entry.stamp == stamp {
                return entry.info.clone();
            }
        }

        let info = self.lookup(conversation_id).await;
        self.cache.lock().await.insert(
            conversation_id.to_string(),
            CacheEntry {
                stamp,
                info: info.clone(),
            },
        );
        info
    }

    async fn lookup(&self, conversation_id: &str) -> PreviewInfo {
        let path = messages_path(conversation_id);

        for field in MESSAGE_TIME_FIELDS {
            let query = Query::collection(&path)
                .order_by(field, Direction::Descending)
                .limit(1);
            match self.store.fetch(&query).await {
                Ok(docs) => {
                    if let Some(doc) = docs.first() {
                        return extract(doc);
                    }
                }
                Err(e) => {
                    debug!(
                        conversation = conversation_id,
                        field,
                        error = %e,
                        "Ordered preview query failed"
                    );
                }
            }
        }

        // Last resort: bounded unordered read, newest document wins so an
        // old message cannot resurface as the preview.
        let query = Query::collection(&path).limit(self.scan_limit);
        match self.store.fetch(&query).await {
            Ok(docs) => docs
                .iter()
                .max_by_key(|d| {
                    normalize::first_timestamp(&d.fields, &MESSAGE_TIME_FIELDS).unwrap_or(0)
                })
                .map(extract)
                .unwrap_or_default(),
            Err(e) => {
                debug!(conversation = conversation_id, error = %e, "Preview scan failed");
                PreviewInfo::default()
            }
        }
    }
}

fn messages_path(conversation_id: &str) -> String {
    format!("conversations/{conversation_id}/messages")
}

fn extract(doc: &Document) -> PreviewInfo {
    PreviewInfo {
        text: normalize::preview_text(&doc.fields),
        last_activity_at: normalize::first_timestamp(&doc.fields, &MESSAGE_TIME_FIELDS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use toit_store::{MemoryStore, Result, Subscription};

    /// Counts one-shot reads passed through to the wrapped store.
    struct CountingStore {
        inner: MemoryStore,
        fetches: AtomicUsize,
    }

    impl CountingStore {
        fn new(inner: MemoryStore) -> Self {
            Self {
                inner,
                fetches: AtomicUsize::new(0),
            }
        }

        fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DocumentStore for CountingStore {
        async fn fetch(&self, query: &Query) -> Result<Vec<Document>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch(query).await
        }

        fn watch(&self, query: &Query) -> Result<Subscription> {
            self.inner.watch(query)
        }
    }

    fn message(id: &str, fields: serde_json::Value) -> Document {
        Document::new(id, fields)
    }

    #[tokio::test]
    async fn resolves_newest_message_by_modern_field() {
        let store = MemoryStore::new();
        store.upsert(
            "conversations/c1/messages",
            message("m1", json!({"text": "old", "created_at": 100})),
        );
        store.upsert(
            "conversations/c1/messages",
            message("m2", json!({"text": "new", "created_at": 200})),
        );

        let resolver = PreviewResolver::new(Arc::new(store), 20);
        let info = resolver.resolve("c1", 200).await;
        assert_eq!(info.text, Some("new".into()));
        assert_eq!(info.last_activity_at, Some(200));
    }

    #[tokio::test]
    async fn falls_back_to_legacy_field_then_scan() {
        let store = MemoryStore::new();
        store.upsert(
            "conversations/c1/messages",
            message("m1", json!({"text": "legacy", "timestamp": 100})),
        );
        store.upsert(
            "conversations/c2/messages",
            message("m2", json!({"text": "untimed"})),
        );

        let counting = Arc::new(CountingStore::new(store));
        let resolver = PreviewResolver::new(counting.clone(), 20);

        // c1: the created_at query matches nothing, the timestamp one wins.
        let info = resolver.resolve("c1", 100).await;
        assert_eq!(info.text, Some("legacy".into()));
        assert_eq!(counting.fetch_count(), 2);

        // c2: both ordered queries match nothing, the scan picks it up.
        let info = resolver.resolve("c2", 0).await;
        assert_eq!(info.text, Some("untimed".into()));
        assert_eq!(info.last_activity_at, None);
        assert_eq!(counting.fetch_count(), 5);
    }

    #[tokio::test]
    async fn unchanged_stamp_short_circuits_to_cache() {
        let store = MemoryStore::new();
        store.upsert(
            "conversations/c1/messages",
            message("m1", json!({"text": "hello", "created_at": 100})),
        );

        let counting = Arc::new(CountingStore::new(store));
        let resolver = PreviewResolver::new(counting.clone(), 20);

        let first = resolver.resolve("c1", 100).await;
        let after_first = counting.fetch_count();

        let second = resolver.resolve("c1", 100).await;
        assert_eq!(first, second);
        assert_eq!(counting.fetch_count(), after_first);
    }

    #[tokio::test]
    async fn changed_stamp_invalidates_cache() {
        let store = MemoryStore::new();
        store.upsert(
            "conversations/c1/messages",
            message("m1", json!({"text": "hello", "created_at": 100})),
        );

        let counting = Arc::new(CountingStore::new(store.clone()));
        let resolver = PreviewResolver::new(counting.clone(), 20);

        let info = resolver.resolve("c1", 100).await;
        assert_eq!(info.text, Some("hello".into()));
        let after_first = counting.fetch_count();

        store.upsert(
            "conversations/c1/messages",
            message("m2", json!({"text": "newer", "created_at": 250})),
        );
        let info = resolver.resolve("c1", 250).await;
        assert_eq!(info.text, Some("newer".into()));
        assert!(counting.fetch_count() > after_first);
    }

    #[tokio::test]
    async fn missing_messages_soft_fail_as_absent() {
        let store = MemoryStore::new();
        let resolver = PreviewResolver::new(Arc::new(store), 20);

        let info = resolver.resolve("ghost", 0).await;
        assert!(info.is_empty());
    }

    #[tokio::test]
    async fn query_failures_soft_fail_as_absent() {
        let store = MemoryStore::new();
        store.fail_field("created_at");
        store.fail_field("timestamp");
        store.upsert(
            "conversations/c1/messages",
            message("m1", json!({"text": "still there"})),
        );

        let resolver = PreviewResolver::new(Arc::new(store), 20);
        // Both ordered queries fail with MissingIndex; the unordered scan
        // touches no indexed field and still recovers the message.
        let info = resolver.resolve("c1", 0).await;
        assert_eq!(info.text, Some("still there".into()));
    }
}
