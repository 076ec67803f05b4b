//! The [`DocumentStore`] trait: the contract every backend implementation
//! (hosted or in-memory) provides to the rest of the application.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::document::Document;
use crate::error::{Result, StoreError};
use crate::query::Query;

/// One pushed result set from a live subscription.
pub type WatchSnapshot = std::result::Result<Vec<Document>, StoreError>;

/// A live subscription: a stream of snapshots plus its cancellation handle.
///
/// The store pushes one initial snapshot on registration and a fresh one
/// after every mutation matching the query. Errors (e.g. a missing index
/// for the query shape) may arrive through the stream as well.
pub struct Subscription {
    pub snapshots: mpsc::UnboundedReceiver<WatchSnapshot>,
    pub handle: WatchHandle,
}

/// Cancels a live subscription. Cloneable; `unsubscribe` is idempotent.
#[derive(Debug, Clone, Default)]
pub struct WatchHandle {
    cancelled: Arc<AtomicBool>,
}

impl WatchHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the subscription. Safe to call more than once; deliveries stop
    /// immediately, including any snapshot already being computed.
    pub fn unsubscribe(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            tracing::debug!("Subscription cancelled");
        }
    }

    pub fn is_active(&self) -> bool {
        !self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// One-shot query: a single request/response read.
    async fn fetch(&self, query: &Query) -> Result<Vec<Document>>;

    /// Open a live subscription to a query.
    fn watch(&self, query: &Query) -> Result<Subscription>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsubscribe_is_idempotent() {
        let handle = WatchHandle::new();
        assert!(handle.is_active());

        handle.unsubscribe();
        assert!(!handle.is_active());

        handle.unsubscribe();
        assert!(!handle.is_active());
    }

    #[test]
    fn clones_share_cancellation() {
        let handle = WatchHandle::new();
        let other = handle.clone();

        other.unsubscribe();
        assert!(!handle.is_active());
    }
}
