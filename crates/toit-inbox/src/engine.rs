//! Multi-shape conversation aggregation.
//!
//! Four sources cover the four historical document shapes: two live
//! subscriptions keyed on the discrete legacy participant fields, and two
//! one-shot best-effort reads keyed on the array-style fields. All four
//! start concurrently; any source producing data replaces its bucket
//! wholesale and triggers a merge pass that deduplicates by conversation
//! id, sorts by activity and re-emits a snapshot. Enrichment runs are
//! tagged with the merge pass that spawned them, so a slow lookup can
//! never overwrite newer data.
//!
//! The engine runs in a dedicated tokio task owning all mutable state,
//! fed through typed channels; the caller gets a handle plus an event
//! receiver.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use toit_store::{Document, DocumentStore, Query, StoreError, Subscription};

use crate::config::InboxConfig;
use crate::error::InboxError;
use crate::normalize;
use crate::preview::{PreviewInfo, PreviewResolver};
use crate::record::ConversationRecord;

/// Root collection holding conversation documents.
pub const CONVERSATIONS: &str = "conversations";

/// The error callback fires once this many live sources have failed;
/// below that, the surviving shape still serves the inbox.
const LIVE_FAILURE_THRESHOLD: usize = 2;

// ---------------------------------------------------------------------------
// Source identity
// ---------------------------------------------------------------------------

/// The four places a conversation can surface from, in merge precedence
/// order: later sources win on id collision. All four normalize from the
/// same underlying documents, so a collision carries the same data either
/// way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKey {
    /// Live watch on the first legacy single-participant field.
    LegacyFirst = 0,
    /// Live watch on the second legacy single-participant field.
    LegacySecond = 1,
    /// One-shot read on the modern participant-id array field.
    ModernArray = 2,
    /// One-shot read on the transitional participant array field.
    TransitionalArray = 3,
}

impl SourceKey {
    pub const ALL: [SourceKey; 4] = [
        SourceKey::LegacyFirst,
        SourceKey::LegacySecond,
        SourceKey::ModernArray,
        SourceKey::TransitionalArray,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Live sources hold a standing subscription; the others are
    /// best-effort one-shot reads whose failures mean "this dataset shape
    /// does not exist here".
    pub fn is_live(self) -> bool {
        matches!(self, SourceKey::LegacyFirst | SourceKey::LegacySecond)
    }

    fn field(self) -> &'static str {
        match self {
            SourceKey::LegacyFirst => normalize::LEGACY_PARTICIPANT_ONE,
            SourceKey::LegacySecond => normalize::LEGACY_PARTICIPANT_TWO,
            SourceKey::ModernArray => normalize::MODERN_PARTICIPANTS,
            SourceKey::TransitionalArray => normalize::TRANSITIONAL_PARTICIPANTS,
        }
    }
}

/// The query one source issues for `user_id`. No server-side ordering:
/// partially migrated documents would drop out of an ordered query under
/// index semantics, so the merge pass sorts client-side instead.
fn source_query(key: SourceKey, user_id: &str, page_size: usize) -> Query {
    let query = Query::collection(CONVERSATIONS);
    let query = if key.is_live() {
        query.where_eq(key.field(), user_id)
    } else {
        query.where_array_contains(key.field(), user_id)
    };
    query.limit(page_size)
}

// ---------------------------------------------------------------------------
// Event / message types
// ---------------------------------------------------------------------------

/// Notifications pushed from the engine task to its consumer.
#[derive(Debug, Clone)]
pub enum InboxEvent {
    /// A fresh merged (possibly enriched) view of the inbox, sorted by
    /// most recent activity.
    Snapshot(Vec<ConversationRecord>),
    /// Enough live sources failed that the view can no longer be trusted.
    /// Emitted at most once per engine instance.
    Failed(InboxError),
}

/// Messages flowing into the engine task.
enum EngineMsg {
    Source {
        key: SourceKey,
        result: Result<Vec<Document>, StoreError>,
    },
    Enriched {
        run_id: u64,
        updates: Vec<(String, PreviewInfo)>,
    },
    Shutdown,
}

// ---------------------------------------------------------------------------
// Aggregation state
// ---------------------------------------------------------------------------

/// Mutable aggregation state, kept apart from the I/O loop so merge
/// behavior is testable without a running task.
struct EngineState {
    buckets: [Vec<ConversationRecord>; 4],
    merged: Vec<ConversationRecord>,
    /// Bumped on every merge pass; enrichment results carrying an older
    /// run id are discarded.
    run_id: u64,
    /// Which live sources have failed. A flaky stream can deliver the
    /// same error repeatedly; only distinct sources count towards the
    /// systemic threshold.
    failed_live: [bool; 2],
    last_failure: Option<StoreError>,
    failure_reported: bool,
}

impl EngineState {
    fn new() -> Self {
        Self {
            buckets: Default::default(),
            merged: Vec::new(),
            run_id: 0,
            failed_live: [false; 2],
            last_failure: None,
            failure_reported: false,
        }
    }

    /// Replace one source's bucket wholesale and recompute the merged
    /// view. Returns the run id of the new merge pass.
    fn apply_update(&mut self, key: SourceKey, records: Vec<ConversationRecord>) -> u64 {
        self.buckets[key.index()] = records;
        self.run_id += 1;
        self.merged = merge(&self.buckets);
        self.run_id
    }

    /// Record a failure of one live source. Returns `true` when the count
    /// of distinct failed sources crosses the systemic threshold for the
    /// first time; repeated errors from the same source never do.
    fn record_live_failure(&mut self, key: SourceKey, error: StoreError) -> bool {
        debug_assert!(key.is_live());
        self.failed_live[key.index()] = true;
        self.last_failure = Some(error);
        if self.failed_source_count() >= LIVE_FAILURE_THRESHOLD && !self.failure_reported {
            self.failure_reported = true;
            true
        } else {
            false
        }
    }

    fn failed_source_count(&self) -> usize {
        self.failed_live.iter().filter(|failed| **failed).count()
    }

    fn failure(&self) -> InboxError {
        InboxError::SourcesUnavailable {
            failed: self.failed_source_count(),
            last: self
                .last_failure
                .clone()
                .unwrap_or(StoreError::SubscriptionClosed),
        }
    }

    /// Splice enrichment results into the merged view in place. Returns
    /// `false` when the pass is stale and must be discarded. The list is
    /// deliberately not re-sorted: rows should not jump between the plain
    /// and enriched emissions, and the next merge pass re-sorts anyway.
    fn apply_enrichment(&mut self, run_id: u64, updates: &[(String, PreviewInfo)]) -> bool {
        if run_id != self.run_id {
            return false;
        }
        for (id, info) in updates {
            if let Some(record) = self.merged.iter_mut().find(|r| &r.id == id) {
                if record.preview_text.is_none() {
                    record.preview_text = info.text.clone();
                    if record.last_activity_at.is_none() {
                        record.last_activity_at = info.last_activity_at;
                    }
                }
            }
        }
        true
    }

    /// Conversations still lacking a preview, capped, in view order.
    fn enrichment_targets(&self, limit: usize) -> Vec<(String, i64)> {
        self.merged
            .iter()
            .filter(|r| r.preview_text.is_none())
            .take(limit)
            .map(|r| (r.id.clone(), r.sort_stamp()))
            .collect()
    }
}

/// Merge all buckets into one deduplicated list sorted by most recent
/// activity. Last bucket wins per id; ties on the stamp break by id so a
/// single merge pass is deterministic.
fn merge(buckets: &[Vec<ConversationRecord>; 4]) -> Vec<ConversationRecord> {
    let mut by_id: HashMap<&str, &ConversationRecord> = HashMap::new();
    for bucket in buckets {
        for record in bucket {
            by_id.insert(record.id.as_str(), record);
        }
    }

    let mut merged: Vec<ConversationRecord> = by_id.into_values().cloned().collect();
    merged.sort_by(|a, b| {
        b.sort_stamp()
            .cmp(&a.sort_stamp())
            .then_with(|| a.id.cmp(&b.id))
    });
    merged
}

// ---------------------------------------------------------------------------
// Engine task
// ---------------------------------------------------------------------------

/// Handle to a running aggregation engine.
#[derive(Clone)]
pub struct InboxHandle {
    tx: mpsc::UnboundedSender<EngineMsg>,
}

impl InboxHandle {
    /// Stop the engine. Idempotent. Live subscriptions are cancelled and
    /// no event is emitted afterwards, regardless of in-flight reads or
    /// enrichment lookups.
    pub fn shutdown(&self) {
        let _ = self.tx.send(EngineMsg::Shutdown);
    }
}

pub struct InboxEngine;

impl InboxEngine {
    /// Start aggregating conversations for `user_id`.
    ///
    /// Returns the control handle and the event stream. The first
    /// [`InboxEvent::Snapshot`] arrives as soon as any source resolves;
    /// later snapshots supersede earlier ones wholesale.
    pub fn spawn(
        store: Arc<dyn DocumentStore>,
        user_id: &str,
        config: InboxConfig,
    ) -> (InboxHandle, mpsc::Receiver<InboxEvent>) {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity);

        let resolver = Arc::new(PreviewResolver::new(
            store.clone(),
            config.preview_scan_limit,
        ));
        let handle = InboxHandle {
            tx: msg_tx.clone(),
        };

        tokio::spawn(run_engine(
            store,
            user_id.to_string(),
            config,
            resolver,
            msg_tx,
            msg_rx,
            event_tx,
        ));

        (handle, event_rx)
    }
}

async fn run_engine(
    store: Arc<dyn DocumentStore>,
    user_id: String,
    config: InboxConfig,
    resolver: Arc<PreviewResolver>,
    msg_tx: mpsc::UnboundedSender<EngineMsg>,
    mut msg_rx: mpsc::UnboundedReceiver<EngineMsg>,
    event_tx: mpsc::Sender<InboxEvent>,
) {
    let mut state = EngineState::new();

    // The live subscriptions stay owned by this task so teardown drops
    // their receivers along with it; nothing is left parked on a stream.
    let mut live_first: Option<Subscription> = None;
    let mut live_second: Option<Subscription> = None;

    // Start all four sources; none waits for another.
    for key in SourceKey::ALL {
        let query = source_query(key, &user_id, config.source_page_size);
        if key.is_live() {
            match store.watch(&query) {
                Ok(subscription) => {
                    let slot = match key {
                        SourceKey::LegacyFirst => &mut live_first,
                        _ => &mut live_second,
                    };
                    *slot = Some(subscription);
                }
                Err(e) => {
                    // A synchronous refusal counts the same as a stream
                    // error from that source.
                    let _ = msg_tx.send(EngineMsg::Source {
                        key,
                        result: Err(e),
                    });
                }
            }
        } else {
            let store = store.clone();
            let tx = msg_tx.clone();
            tokio::spawn(async move {
                let result = store.fetch(&query).await;
                let _ = tx.send(EngineMsg::Source { key, result });
            });
        }
    }

    info!(user = %user_id, "Inbox aggregation started");

    loop {
        let msg = tokio::select! {
            msg = msg_rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
            result = watch_snapshot(&mut live_first) => match result {
                Some(result) => EngineMsg::Source {
                    key: SourceKey::LegacyFirst,
                    result,
                },
                None => {
                    live_first = None;
                    continue;
                }
            },
            result = watch_snapshot(&mut live_second) => match result {
                Some(result) => EngineMsg::Source {
                    key: SourceKey::LegacySecond,
                    result,
                },
                None => {
                    live_second = None;
                    continue;
                }
            },
        };

        match msg {
            EngineMsg::Source {
                key,
                result: Ok(docs),
            } => {
                let records: Vec<ConversationRecord> =
                    docs.iter().filter_map(normalize::normalize).collect();
                debug!(
                    source = ?key,
                    raw = docs.len(),
                    normalized = records.len(),
                    "Source updated"
                );

                let run_id = state.apply_update(key, records);
                if emit(&event_tx, InboxEvent::Snapshot(state.merged.clone()))
                    .await
                    .is_err()
                {
                    break;
                }
                schedule_enrichment(
                    &state,
                    run_id,
                    config.enrich_limit,
                    resolver.clone(),
                    msg_tx.clone(),
                );
            }

            EngineMsg::Source {
                key,
                result: Err(e),
            } if key.is_live() => {
                warn!(source = ?key, error = %e, "Live conversation source failed");
                if state.record_live_failure(key, e) {
                    let failure = state.failure();
                    error!(error = %failure, "Inbox view degraded");
                    if emit(&event_tx, InboxEvent::Failed(failure)).await.is_err() {
                        break;
                    }
                }
            }

            EngineMsg::Source {
                key,
                result: Err(e),
            } => {
                // This dataset shape does not exist here; not a fault.
                debug!(source = ?key, error = %e, "Best-effort source skipped");
            }

            EngineMsg::Enriched { run_id, updates } => {
                if state.apply_enrichment(run_id, &updates) {
                    if emit(&event_tx, InboxEvent::Snapshot(state.merged.clone()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                } else {
                    debug!(
                        stale_run = run_id,
                        current_run = state.run_id,
                        "Stale enrichment pass discarded"
                    );
                }
            }

            EngineMsg::Shutdown => {
                debug!(user = %user_id, "Inbox aggregation shutdown requested");
                break;
            }
        }
    }

    for subscription in [&live_first, &live_second].into_iter().flatten() {
        subscription.handle.unsubscribe();
    }
    // Returning drops the subscriptions, closing their receivers so the
    // store can discard the watches.
    info!(user = %user_id, "Inbox aggregation stopped");
}

async fn emit(
    event_tx: &mpsc::Sender<InboxEvent>,
    event: InboxEvent,
) -> Result<(), mpsc::error::SendError<InboxEvent>> {
    event_tx.send(event).await
}

/// Await the next snapshot of one live subscription. `None` once the
/// stream ends; an empty slot never resolves.
async fn watch_snapshot(
    slot: &mut Option<Subscription>,
) -> Option<Result<Vec<Document>, StoreError>> {
    match slot {
        Some(subscription) => subscription.snapshots.recv().await,
        None => std::future::pending().await,
    }
}

/// Fire-and-forget enrichment for the current merge pass. The batch is
/// tagged with `run_id`; by the time it resolves a newer pass may have
/// run, in which case the engine discards it.
fn schedule_enrichment(
    state: &EngineState,
    run_id: u64,
    limit: usize,
    resolver: Arc<PreviewResolver>,
    tx: mpsc::UnboundedSender<EngineMsg>,
) {
    let targets = state.enrichment_targets(limit);
    if targets.is_empty() {
        return;
    }

    tokio::spawn(async move {
        let lookups = targets
            .into_iter()
            .map(|(id, stamp)| {
                let resolver = resolver.clone();
                async move {
                    let info = resolver.resolve(&id, stamp).await;
                    (id, info)
                }
            })
            .collect::<Vec<_>>();

        let updates: Vec<(String, PreviewInfo)> = futures::future::join_all(lookups)
            .await
            .into_iter()
            .filter(|(_, info)| !info.is_empty())
            .collect();

        if !updates.is_empty() {
            let _ = tx.send(EngineMsg::Enriched { run_id, updates });
        }
    });
}
