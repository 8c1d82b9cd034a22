//! Crate-wide error types (spec §7).

use crate::model::Topic;
use thiserror::Error;

/// Errors surfaced by the [`crate::consumer::LogConsumer`] collaborator.
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("no partitions available for topic {topic}")]
    NoPartitions { topic: Topic },

    #[error("consumer poll failed: {0}")]
    Poll(String),

    #[error("consumer assign/seek failed: {0}")]
    Assign(String),
}

/// Errors surfaced by the [`crate::eventual::EventualPointers`] collaborator.
#[derive(Error, Debug)]
pub enum EventualError {
    #[error("failed to fetch durable pointers for topic {topic}: {reason}")]
    Fetch { topic: Topic, reason: String },
}

/// Top-level error type returned by the [`crate::registry::HeadCache`] API.
#[derive(Error, Debug)]
pub enum HeadCacheError {
    /// C1 yielded no partitions after bounded retry (spec §4.3.1 step 2,
    /// §7 kind 1). TopicCache construction fails; this propagates to the
    /// caller of the first `get` for that topic.
    #[error("partition discovery failed for topic {topic} after {attempts} attempts")]
    PartitionDiscoveryFailed { topic: Topic, attempts: u32 },

    /// The ingest loop hit an uncaught error and the TopicCache is now
    /// poisoned; queries fail open with this until the registry tears
    /// the TopicCache down (spec §7 kind 2).
    #[error("ingest loop for topic {topic} failed: {source}")]
    IngestFailed {
        topic: Topic,
        #[source]
        source: ConsumerError,
    },

    /// A cleanup cycle failed to fetch durable pointers (spec §7 kind 3).
    /// Never propagated to a caller — logged and the cycle retries at
    /// the next `clean_interval` tick. Kept as a typed variant so the
    /// log line carries a consistent message.
    #[error("cleanup cycle for topic {topic} failed: {source}")]
    CleanupFailed {
        topic: Topic,
        #[source]
        source: EventualError,
    },

    /// A query arrived after [`crate::registry::HeadCache::close`] (spec
    /// §7 kind 4).
    #[error("HeadCache is closed")]
    Closed,

    #[error("invalid HeadCache configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Consumer(#[from] ConsumerError),

    #[error(transparent)]
    Eventual(#[from] EventualError),
}

pub type Result<T> = std::result::Result<T, HeadCacheError>;
