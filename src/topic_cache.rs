//! TopicCache (C3, spec §4.3): per-topic state machine. Owns the ingest
//! loop, the cleanup loop, and the shared, mutation-serialized `State`.
//!
//! Grounded on the teacher's `ReplicationSlotManager` (two
//! `tokio::spawn`'d background loops stored as `JoinHandle`s, aborted on
//! drop) and `QueryCache`'s lock-acquire/merge/evict sequencing. Unlike
//! the teacher's loops, which hold a strong handle back to the manager
//! for their entire lifetime, these two hold only a `Weak<TopicCache>` —
//! the loops themselves must never be what keeps a `TopicCache` alive,
//! or it could never be torn down (spec §9: "dropping the TopicCache
//! cancels both").

use crate::backoff::BackoffPolicy;
use crate::config::HeadCacheConfig;
use crate::consumer::LogConsumer;
use crate::error::{HeadCacheError, Result};
use crate::eventual::EventualPointers;
use crate::listener::{Listener, ListenerId};
use crate::metrics::Metrics;
use crate::model::{
    AggregateId, Entry, JournalAction, NonEmptyInfo, Offset, Partition, PartitionEntry,
    QueryResult, Record, Topic,
};
use crate::state::{combine_and_trim, decide, remove_until, Decision, Entries, State};
use parking_lot::Mutex;
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct Inner {
    state: State,
    listeners: Vec<Listener>,
}

struct BackgroundTasks {
    ingest: JoinHandle<()>,
    cleanup: JoinHandle<()>,
}

/// Per-topic state machine (spec §4.3). One instance is shared by the
/// registry's lazily-created per-topic cell and every in-flight query
/// that is currently suspended behind a listener; the ingest and cleanup
/// loops hold only a [`Weak`] reference so they never keep a `TopicCache`
/// alive on their own.
pub struct TopicCache {
    topic: Topic,
    config: HeadCacheConfig,
    inner: Mutex<Inner>,
    next_listener_id: AtomicU64,
    /// Set when the ingest loop hits an uncaught error (spec §7 kind 2).
    /// While set, `get` fails open with `Invalid`.
    failed: AtomicBool,
    metrics: Arc<dyn Metrics>,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl TopicCache {
    /// Initialization sequence (spec §4.3.1).
    pub async fn new(
        topic: Topic,
        consumer: Arc<dyn LogConsumer>,
        eventual: Arc<dyn EventualPointers>,
        config: HeadCacheConfig,
        metrics: Arc<dyn Metrics>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        // Step 1: seed entries from the durable pointer summary.
        let pointers = eventual.pointers(&topic).await?;
        let mut entries: Entries = Entries::new();
        for (&partition, &offset) in &pointers {
            entries.insert(partition, PartitionEntry::empty(partition, offset));
        }

        // Step 2: resolve partitions with bounded-retry full-jitter backoff.
        let backoff = BackoffPolicy::partition_discovery();
        let attempts = Cell::new(0u32);
        let discovered = backoff
            .retry(|| {
                attempts.set(attempts.get() + 1);
                let consumer = Arc::clone(&consumer);
                let topic = topic.clone();
                async move { consumer.partitions(&topic).await.ok().filter(|p| !p.is_empty()) }
            })
            .await;
        let Some(partitions) = discovered else {
            return Err(HeadCacheError::PartitionDiscoveryFailed {
                topic,
                attempts: attempts.get(),
            });
        };

        for &partition in &partitions {
            entries
                .entry(partition)
                .or_insert_with(|| PartitionEntry::empty(partition, Offset(0)));
        }

        // Step 3: assign + seek.
        let partition_list: Vec<Partition> = partitions.into_iter().collect();
        consumer.assign(&topic, &partition_list).await?;

        let seek_offsets: HashMap<Partition, Offset> = partition_list
            .iter()
            .map(|&p| {
                let start = pointers
                    .get(&p)
                    .map(|o| Offset(o.0 + 1))
                    .unwrap_or(Offset(0));
                (p, start)
            })
            .collect();
        consumer.seek(&topic, seek_offsets).await?;

        let topic_cache = Arc::new(TopicCache {
            topic: topic.clone(),
            config,
            inner: Mutex::new(Inner {
                state: State::new(entries),
                listeners: Vec::new(),
            }),
            next_listener_id: AtomicU64::new(0),
            failed: AtomicBool::new(false),
            metrics,
            tasks: Mutex::new(None),
        });

        // Step 4: spawn background activities. Each loop is handed only a
        // `Weak` back to this `TopicCache` — holding a strong `Arc` here
        // would mean the strong count could never reach zero, `Drop`
        // would never run, and the loops would never be aborted.
        let ingest = tokio::spawn(Self::ingest_loop(
            Arc::downgrade(&topic_cache),
            Arc::clone(&consumer),
        ));
        let cleanup = tokio::spawn(Self::cleanup_loop(Arc::downgrade(&topic_cache), eventual));
        *topic_cache.tasks.lock() = Some(BackgroundTasks { ingest, cleanup });

        Ok(topic_cache)
    }

    /// Whether the ingest loop has poisoned this TopicCache (spec §7
    /// kind 2). Exposed so the registry can decide whether to keep
    /// sharing this instance or recreate it.
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Abort the ingest and cleanup loops, if they are still running.
    /// Idempotent — a second call is a no-op. Called explicitly by
    /// [`crate::registry::HeadCache::close`] so teardown is immediate
    /// rather than waiting on the last `Arc<TopicCache>` to drop, and
    /// also by this type's own `Drop` impl for callers that hold a
    /// `TopicCache` outside the registry.
    pub fn shutdown(&self) {
        if let Some(tasks) = self.tasks.lock().take() {
            tasks.ingest.abort();
            tasks.cleanup.abort();
        }
        self.fail_pending_listeners();
    }

    /// Query protocol (spec §4.3.5, §4.3.6). Fails open to `Invalid`
    /// when this TopicCache has been poisoned by an ingest failure —
    /// this method never returns an error. Takes `self` by `Arc` so a
    /// registered listener can hold a strong reference for cancellation
    /// safety (see [`ListenerGuard`]); callers holding their own `Arc`
    /// should pass `Arc::clone(&cache)` if they need it again after.
    pub async fn get(self: Arc<Self>, id: AggregateId, partition: Partition, offset: Offset) -> QueryResult {
        if self.is_failed() {
            return QueryResult::Invalid;
        }

        // Fast path: answer straight from a snapshot if possible.
        let fast = {
            let guard = self.inner.lock();
            decide(&guard.state.entries, &id, partition, offset)
        };
        if let Decision::Answer(result) = fast {
            return result;
        }

        // Enter the serializing primitive, re-check (another update may
        // have landed between the fast path and here), else register.
        let (tx, rx) = oneshot::channel();
        let listener_id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut guard = self.inner.lock();
            match decide(&guard.state.entries, &id, partition, offset) {
                Decision::Answer(result) => return result,
                Decision::Behind => {
                    guard
                        .listeners
                        .push(Listener::new(listener_id, id, partition, offset, tx));
                }
            }
        }

        // Tie the listener's lifetime to this query task (resolves the
        // query-timeout leak flagged in spec §5/§9(a)): if the awaiting
        // future is dropped (cancelled) before completion, the guard
        // deregisters the listener on drop.
        let _guard = ListenerGuard {
            topic_cache: Arc::clone(&self),
            listener_id,
        };
        match rx.await {
            Ok(result) => result,
            // Sender dropped without sending: TopicCache torn down
            // mid-wait. Fail open.
            Err(_) => QueryResult::Invalid,
        }
    }

    fn remove_listener(&self, listener_id: ListenerId) {
        let mut guard = self.inner.lock();
        if let Some(pos) = guard.listeners.iter().position(|l| l.listener_id == listener_id) {
            guard.listeners.swap_remove(pos);
        }
    }

    /// Complete every currently pending listener with `Invalid` and
    /// clear the listener list. Used when this TopicCache is poisoned
    /// (spec §7 kind 2) or torn down: a query already suspended on
    /// `rx.await` must fail open rather than hang forever waiting for a
    /// decision table re-evaluation that will never come.
    fn fail_pending_listeners(&self) {
        let mut guard = self.inner.lock();
        for listener in guard.listeners.iter_mut() {
            listener.fail_open();
        }
        guard.listeners.clear();
    }

    /// Ingest loop (spec §4.3.2). Takes only a [`Weak`] handle — see the
    /// module doc comment — and exits as soon as the upgrade fails,
    /// i.e. once the registry has dropped its last strong reference.
    async fn ingest_loop(weak: Weak<TopicCache>, consumer: Arc<dyn LogConsumer>) {
        loop {
            let Some(self_arc) = weak.upgrade() else {
                return;
            };

            let batch = match consumer.poll(self_arc.config.poll_timeout).await {
                Ok(batch) => batch,
                Err(err) => {
                    let wrapped = HeadCacheError::IngestFailed {
                        topic: self_arc.topic.clone(),
                        source: err,
                    };
                    tracing::error!(topic = %self_arc.topic, error = %wrapped, "ingest loop failed, topic cache poisoned");
                    self_arc.failed.store(true, Ordering::SeqCst);
                    // Every query already suspended behind a listener
                    // would otherwise hang forever — fail them open.
                    self_arc.fail_pending_listeners();
                    return;
                }
            };
            if batch.is_empty() {
                continue;
            }

            let first_timestamp = batch
                .values()
                .flat_map(|records| records.iter())
                .map(|record| record.timestamp)
                .min();

            let candidate = build_candidate(batch);
            let new_entry_count: usize = candidate.values().map(|p| p.entries.len()).sum();

            let (listener_count, trimmed) = {
                let mut guard = self_arc.inner.lock();
                let merged =
                    combine_and_trim(&guard.state.entries, candidate, self_arc.config.max_size);
                let trimmed = merged.values().any(|p| p.trimmed.is_some());
                guard.state = State::new(merged);

                let mut pending = std::mem::take(&mut guard.listeners);
                let mut still_pending = Vec::with_capacity(pending.len());
                for mut listener in pending.drain(..) {
                    if !listener.try_satisfy(&guard.state.entries) {
                        still_pending.push(listener);
                    }
                }
                guard.listeners = still_pending;
                (guard.listeners.len(), trimmed)
            };

            let delivery_latency_ms = first_timestamp
                .map(|ts| (chrono::Utc::now() - ts).num_milliseconds() as f64)
                .unwrap_or(0.0);

            self_arc.metrics.round(
                &self_arc.topic,
                new_entry_count,
                listener_count,
                delivery_latency_ms,
                trimmed,
            );
            self_arc.metrics.listeners(&self_arc.topic, listener_count);
        }
    }

    /// Cleanup loop (spec §4.3.3). Takes only a [`Weak`] handle — see
    /// the module doc comment and [`Self::ingest_loop`] — and does not
    /// hold a strong reference across the `clean_interval` sleep, so a
    /// concurrent teardown isn't delayed by a full sleep cycle.
    async fn cleanup_loop(weak: Weak<TopicCache>, eventual: Arc<dyn EventualPointers>) {
        loop {
            let Some(clean_interval) = weak.upgrade().map(|t| t.config.clean_interval) else {
                return;
            };
            tokio::time::sleep(clean_interval).await;

            let Some(self_arc) = weak.upgrade() else {
                return;
            };
            match eventual.pointers(&self_arc.topic).await {
                Ok(pointers) => {
                    let removed = {
                        let mut guard = self_arc.inner.lock();
                        remove_until(&mut guard.state.entries, &pointers)
                    };
                    tracing::debug!(topic = %self_arc.topic, removed, "cleanup cycle complete");
                }
                Err(err) => {
                    // Cleanup is advisory (spec §7 kind 3): log and
                    // continue, rely on ingest-side trimming for the
                    // memory bound.
                    let wrapped = HeadCacheError::CleanupFailed {
                        topic: self_arc.topic.clone(),
                        source: err,
                    };
                    tracing::warn!(topic = %self_arc.topic, error = %wrapped, "cleanup cycle failed");
                }
            }
        }
    }
}

impl Drop for TopicCache {
    fn drop(&mut self) {
        // Covers callers that hold a `TopicCache` directly rather than
        // through the registry, which calls `shutdown()` itself from
        // `close()`. Idempotent, so running it again here is harmless.
        self.shutdown();
    }
}

struct ListenerGuard {
    topic_cache: Arc<TopicCache>,
    listener_id: ListenerId,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.topic_cache.remove_listener(self.listener_id);
    }
}

/// Fold a raw poll batch into a candidate entries map (spec §4.3.2 step
/// 4). Undecodable records are dropped before grouping; the partition's
/// tracked offset only reflects records that decoded into an action.
fn build_candidate(batch: HashMap<Partition, Vec<Record>>) -> Entries {
    let mut candidate = Entries::new();

    for (partition, records) in batch {
        let decoded: Vec<(Record, JournalAction)> = records
            .into_iter()
            .filter_map(|record| {
                let action = JournalAction::decode(&record.header)?;
                Some((record, action))
            })
            .collect();

        if decoded.is_empty() {
            continue;
        }

        let max_offset = decoded
            .iter()
            .map(|(record, _)| record.offset)
            .max()
            .expect("non-empty");

        let mut per_id: HashMap<AggregateId, (Offset, Option<NonEmptyInfo>)> = HashMap::new();
        for (record, action) in decoded {
            let advances_offset = !matches!(action, JournalAction::Mark { .. });
            let slot = per_id
                .entry(record.id.clone())
                .or_insert((Offset(0), None));
            if advances_offset && record.offset.0 > slot.0 .0 {
                slot.0 = record.offset;
            }
            slot.1 = crate::model::JournalInfo::fold_action(slot.1, &action);
        }

        let mut entries = HashMap::new();
        for (id, (offset, info)) in per_id {
            if let Some(info) = info {
                entries.insert(
                    id.clone(),
                    Entry {
                        id,
                        offset,
                        info,
                    },
                );
            }
        }

        candidate.insert(
            partition,
            PartitionEntry {
                partition,
                offset: max_offset,
                entries,
                trimmed: None,
            },
        );
    }

    candidate
}
