//! head_cache: a concurrent, bounded in-memory index over the tail of a
//! partitioned, append-only journal, reconciled against an eventually
//! consistent durable-pointer store.
//!
//! ```text
//!                         ┌─────────────────────────┐
//!   C1 LogConsumer ──────▶│                          │
//!                         │   TopicCache (per topic) │◀──── get(id, partition, offset)
//!   C2 EventualPointers ─▶│   ingest loop + cleanup   │
//!                         │   loop + pending listeners│
//!                         └─────────────────────────┘
//!                                     ▲
//!                                     │ lazily created, shared, torn down
//!                              HeadCache registry (C4)
//! ```
//!
//! A query answers from the in-memory snapshot when possible
//! ([`model::QueryResult`]); when the cache hasn't caught up to the
//! requested offset yet, the caller waits behind a one-shot listener
//! that is woken the next time the ingest loop observes enough records.
//!
//! Construct a [`registry::HeadCache`] with a per-topic factory for the
//! [`consumer::LogConsumer`]/[`eventual::EventualPointers`] collaborators,
//! then call [`registry::HeadCacheApi::get`]. Wrap it in
//! [`decorators::MetricsHeadCache`] and/or [`decorators::LoggingHeadCache`]
//! for observability; both preserve `get`/`close` semantics.

pub mod backoff;
pub mod config;
pub mod consumer;
pub mod decorators;
pub mod error;
pub mod eventual;
pub mod listener;
pub mod metrics;
pub mod model;
pub mod registry;
pub mod state;
pub mod topic_cache;

pub use config::HeadCacheConfig;
pub use error::{HeadCacheError, Result};
pub use model::{AggregateId, JournalInfo, NonEmptyInfo, Offset, Partition, QueryResult, Topic};
pub use registry::{Collaborators, HeadCache, HeadCacheApi};
