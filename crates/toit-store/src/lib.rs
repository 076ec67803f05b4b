//! # toit-store
//!
//! Client layer for the hosted document database backing the Toit
//! marketplace.
//!
//! Conversations, messages and the rest of the marketplace data live in a
//! schema-free document store addressed by slash-joined collection paths.
//! This crate exposes the small query surface the application actually
//! uses (equality, array membership, ordering, limits) behind the
//! [`DocumentStore`] trait, together with an in-memory implementation used
//! for local development and tests.

pub mod client;
pub mod document;
pub mod memory;
pub mod query;

mod error;

pub use client::{DocumentStore, Subscription, WatchHandle, WatchSnapshot};
pub use document::Document;
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use query::{Direction, Filter, OrderBy, Query};
