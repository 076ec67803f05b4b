use thiserror::Error;
use toit_store::StoreError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InboxError {
    /// Too many of the live conversation sources failed for the merged
    /// view to be trusted. A single source failing (e.g. one query shape
    /// without an index) is recovered locally and never surfaces.
    #[error("Conversation sources unavailable ({failed} subscriptions failed): {last}")]
    SourcesUnavailable { failed: usize, last: StoreError },
}
