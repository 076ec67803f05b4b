//! # toit-inbox
//!
//! Conversation aggregation and live-sync for the Toit marketplace inbox.
//!
//! Conversation documents accumulated four incompatible shapes over the
//! product's history: a modern participant-id array, a transitional
//! participant array under another name, and a legacy pair of discrete
//! single-participant fields, each combined with one of several timestamp
//! encodings. This crate reconciles all of them into one stable, sorted
//! inbox view: two live subscriptions and two one-shot reads run
//! concurrently, their results are normalized, merged by conversation id
//! and deduplicated, conversations lacking a cached preview are enriched
//! through bounded fallback lookups, and every change re-emits a
//! consistent snapshot without flicker, duplicate network calls or stale
//! overwrites.

pub mod config;
pub mod engine;
pub mod feed;
pub mod normalize;
pub mod preview;
pub mod record;
pub mod session;

mod error;

pub use config::InboxConfig;
pub use engine::{InboxEngine, InboxEvent, InboxHandle, SourceKey};
pub use error::InboxError;
pub use feed::{InboxFeed, InboxView};
pub use preview::{PreviewInfo, PreviewResolver};
pub use record::ConversationRecord;
pub use session::Session;
