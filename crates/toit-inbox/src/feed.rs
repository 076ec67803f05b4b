//! Reactive inbox binding for the presentation layer.
//!
//! [`InboxFeed`] owns the engine lifecycle: it watches the authentication
//! signal, starts an aggregation engine once a hydrated identity appears,
//! tears it down and starts a fresh one when the identity changes, and
//! folds engine events into a single [`InboxView`] value observable over a
//! `tokio::sync::watch` channel.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use toit_store::DocumentStore;

use crate::config::InboxConfig;
use crate::engine::{InboxEngine, InboxEvent, InboxHandle};
use crate::record::ConversationRecord;
use crate::session::Session;

/// Presentation-facing inbox state.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxView {
    pub items: Vec<ConversationRecord>,
    /// True from (re)subscription until the first snapshot arrives.
    pub is_loading: bool,
    pub is_loading_more: bool,
    pub has_more: bool,
    /// Rendered message of a systemic failure, if one occurred.
    pub error: Option<String>,
}

/// Reactive inbox handle for the UI.
pub struct InboxFeed {
    state_rx: watch::Receiver<InboxView>,
    /// Cursor into the next page of the merged view. There is no cursor
    /// that is valid across four heterogeneous sources at once, so this
    /// stays `None` and [`InboxFeed::load_more`] stays a no-op; each
    /// source already loads up to its page-size cap.
    page_cursor: Option<String>,
}

impl InboxFeed {
    /// Start driving inbox engines from the given session signal.
    pub fn spawn(
        store: Arc<dyn DocumentStore>,
        sessions: watch::Receiver<Session>,
        config: InboxConfig,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(InboxView::default());
        tokio::spawn(run_feed(store, sessions, config, state_tx));
        Self {
            state_rx,
            page_cursor: None,
        }
    }

    /// Subscribe to view updates.
    pub fn subscribe(&self) -> watch::Receiver<InboxView> {
        self.state_rx.clone()
    }

    /// Current view snapshot.
    pub fn view(&self) -> InboxView {
        self.state_rx.borrow().clone()
    }

    /// Request the next page of conversations.
    ///
    /// Returns immediately when there is no page cursor, a load is already
    /// in flight, or no more pages are available. For the merged
    /// multi-shape view all three are permanently the case.
    pub fn load_more(&self) {
        let view = self.state_rx.borrow();
        if self.page_cursor.is_none() || view.is_loading_more || !view.has_more {
            return;
        }
        // Unreachable until a cross-source cursor exists.
        debug!("load_more requested with an active cursor");
    }
}

/// One running engine bound to an identity.
struct ActiveEngine {
    handle: InboxHandle,
    events: mpsc::Receiver<InboxEvent>,
    user_id: String,
}

async fn run_feed(
    store: Arc<dyn DocumentStore>,
    mut sessions: watch::Receiver<Session>,
    config: InboxConfig,
    state_tx: watch::Sender<InboxView>,
) {
    let mut engine: Option<ActiveEngine> = None;

    // The receiver may already hold an actionable session.
    let initial = sessions.borrow_and_update().clone();
    apply_session(&initial, &store, &config, &mut engine, &state_tx);

    loop {
        tokio::select! {
            changed = sessions.changed() => {
                if changed.is_err() {
                    // Auth signal gone; the feed dies with it.
                    break;
                }
                let session = sessions.borrow_and_update().clone();
                apply_session(&session, &store, &config, &mut engine, &state_tx);
            }

            event = next_event(&mut engine) => {
                match event {
                    Some(InboxEvent::Snapshot(items)) => {
                        state_tx.send_modify(|view| {
                            view.items = items;
                            view.is_loading = false;
                        });
                    }
                    Some(InboxEvent::Failed(e)) => {
                        state_tx.send_modify(|view| {
                            view.error = Some(e.to_string());
                            view.is_loading = false;
                        });
                    }
                    None => {
                        // Engine closed its stream; stop polling it.
                        engine = None;
                    }
                }
            }
        }
    }

    if let Some(active) = &engine {
        active.handle.shutdown();
    }
}

async fn next_event(engine: &mut Option<ActiveEngine>) -> Option<InboxEvent> {
    match engine {
        Some(active) => active.events.recv().await,
        None => std::future::pending().await,
    }
}

/// Reconcile the running engine with the session's identity.
fn apply_session(
    session: &Session,
    store: &Arc<dyn DocumentStore>,
    config: &InboxConfig,
    engine: &mut Option<ActiveEngine>,
    state_tx: &watch::Sender<InboxView>,
) {
    let desired = session.active_user();
    if engine.as_ref().map(|e| e.user_id.as_str()) == desired {
        return;
    }

    if let Some(active) = engine.take() {
        debug!(user = %active.user_id, "Tearing down inbox engine");
        active.handle.shutdown();
    }

    match desired {
        Some(user_id) => {
            info!(user = %user_id, "Starting inbox aggregation");
            let (handle, events) = InboxEngine::spawn(store.clone(), user_id, config.clone());
            *engine = Some(ActiveEngine {
                handle,
                events,
                user_id: user_id.to_string(),
            });
            state_tx.send_replace(InboxView {
                is_loading: true,
                ..InboxView::default()
            });
        }
        None => {
            state_tx.send_replace(InboxView::default());
        }
    }
}
