//! Log Consumer adapter (C1, spec §4.1): a typed cursor over a
//! partitioned log. Production adapters wrap whatever log client the
//! embedding application uses; this module defines the contract plus an
//! in-memory [`MockLogConsumer`] test double used by the crate's own
//! tests and available to downstream integration tests.

use crate::error::ConsumerError;
use crate::model::{Offset, Partition, Record, Topic};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Contract exposed to the [`crate::topic_cache::TopicCache`] (§4.1).
///
/// Configuration implementations are created with (earliest-offset
/// policy, no consumer group, manual commit disabled) is applied by the
/// caller via [`crate::config::ConsumerOverrides`]; this trait only
/// carries the operations, not the connection configuration.
#[async_trait]
pub trait LogConsumer: Send + Sync {
    /// Bind the consumer to exactly these partitions.
    async fn assign(&self, topic: &Topic, partitions: &[Partition]) -> Result<(), ConsumerError>;

    /// Set the starting position per partition to the provided offset.
    async fn seek(
        &self,
        topic: &Topic,
        offsets: HashMap<Partition, Offset>,
    ) -> Result<(), ConsumerError>;

    /// Poll for new records, bounded by `timeout`. May return an empty
    /// map; never blocks indefinitely.
    async fn poll(
        &self,
        timeout: Duration,
    ) -> Result<HashMap<Partition, Vec<Record>>, ConsumerError>;

    /// List currently known partitions for `topic`. Fails with
    /// [`ConsumerError::NoPartitions`] when empty.
    async fn partitions(&self, topic: &Topic) -> Result<HashSet<Partition>, ConsumerError>;
}

/// In-memory test double for [`LogConsumer`]. Records are appended by
/// test harnesses via [`MockLogConsumer::push`]; `poll` drains whatever
/// is newly visible for the assigned partitions from each partition's
/// current seek position.
pub struct MockLogConsumer {
    topic: Topic,
    available_partitions: RwLock<HashSet<Partition>>,
    assigned: RwLock<HashSet<Partition>>,
    positions: RwLock<HashMap<Partition, Offset>>,
    logs: RwLock<HashMap<Partition, Vec<Record>>>,
    /// When set, the next `poll` call returns this error instead of a
    /// batch, then clears it — lets tests drive the ingest loop into
    /// its poisoned state (spec §7 kind 2).
    fail_next_poll: RwLock<Option<String>>,
    /// Counts every `poll` call — lets tests confirm the ingest loop has
    /// actually stopped running after teardown, not just that it was
    /// asked to.
    poll_count: AtomicU64,
}

impl MockLogConsumer {
    pub fn new(topic: impl Into<Topic>) -> Self {
        Self {
            topic: topic.into(),
            available_partitions: RwLock::new(HashSet::new()),
            assigned: RwLock::new(HashSet::new()),
            positions: RwLock::new(HashMap::new()),
            logs: RwLock::new(HashMap::new()),
            fail_next_poll: RwLock::new(None),
            poll_count: AtomicU64::new(0),
        }
    }

    pub fn poll_count(&self) -> u64 {
        self.poll_count.load(Ordering::SeqCst)
    }

    /// Declare which partitions this topic has, for `partitions()` to
    /// report. Chainable for test setup convenience.
    pub fn with_partitions(self, partitions: impl IntoIterator<Item = Partition>) -> Self {
        self.available_partitions.write().extend(partitions);
        self
    }

    /// Append a record to a partition's log, as if it had just arrived.
    pub fn push(&self, partition: Partition, record: Record) {
        self.available_partitions.write().insert(partition);
        self.logs.write().entry(partition).or_default().push(record);
    }

    /// Make the next `poll` call return an error, simulating a broken
    /// log connection.
    pub fn fail_next_poll(&self, reason: impl Into<String>) {
        *self.fail_next_poll.write() = Some(reason.into());
    }
}

#[async_trait]
impl LogConsumer for MockLogConsumer {
    async fn assign(&self, topic: &Topic, partitions: &[Partition]) -> Result<(), ConsumerError> {
        if topic != &self.topic {
            return Err(ConsumerError::Assign(format!(
                "mock consumer bound to topic {}, asked to assign {}",
                self.topic, topic
            )));
        }
        *self.assigned.write() = partitions.iter().copied().collect();
        Ok(())
    }

    async fn seek(
        &self,
        topic: &Topic,
        offsets: HashMap<Partition, Offset>,
    ) -> Result<(), ConsumerError> {
        if topic != &self.topic {
            return Err(ConsumerError::Assign(format!(
                "mock consumer bound to topic {}, asked to seek {}",
                self.topic, topic
            )));
        }
        let mut positions = self.positions.write();
        for (partition, offset) in offsets {
            positions.insert(partition, offset);
        }
        Ok(())
    }

    async fn poll(
        &self,
        timeout: Duration,
    ) -> Result<HashMap<Partition, Vec<Record>>, ConsumerError> {
        // Never blocks indefinitely: yield once so callers composing
        // this with real cancellation still see a suspension point, but
        // don't actually wait out the timeout when data is available.
        tokio::task::yield_now().await;
        let _ = timeout;
        self.poll_count.fetch_add(1, Ordering::SeqCst);

        if let Some(reason) = self.fail_next_poll.write().take() {
            return Err(ConsumerError::Poll(reason));
        }

        let assigned = self.assigned.read().clone();
        let logs = self.logs.read();
        let mut positions = self.positions.write();
        let mut out = HashMap::new();

        for partition in assigned {
            let position = positions.entry(partition).or_insert(Offset(0));
            if let Some(records) = logs.get(&partition) {
                let batch: Vec<Record> = records
                    .iter()
                    .filter(|r| r.offset.0 >= position.0)
                    .cloned()
                    .collect();
                if let Some(last) = batch.last() {
                    *position = Offset(last.offset.0 + 1);
                }
                if !batch.is_empty() {
                    out.insert(partition, batch);
                }
            }
        }
        Ok(out)
    }

    async fn partitions(&self, topic: &Topic) -> Result<HashSet<Partition>, ConsumerError> {
        if topic != &self.topic {
            return Err(ConsumerError::NoPartitions {
                topic: topic.clone(),
            });
        }
        let partitions = self.available_partitions.read().clone();
        if partitions.is_empty() {
            return Err(ConsumerError::NoPartitions {
                topic: topic.clone(),
            });
        }
        Ok(partitions)
    }
}
