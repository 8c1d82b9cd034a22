//! The HeadCache registry (C4, spec §4.4): lazily creates, shares, and
//! tears down one [`TopicCache`] per topic. Grounded on the teacher's
//! tenant registry in `multitenant/cdb.rs` — a concurrent map from key
//! to lazily-initialized shared state — swapped to `dashmap::DashMap`
//! per the fan-out concurrency this workload needs.

use crate::config::HeadCacheConfig;
use crate::consumer::LogConsumer;
use crate::error::{HeadCacheError, Result};
use crate::eventual::EventualPointers;
use crate::metrics::Metrics;
use crate::model::{AggregateId, Offset, Partition, QueryResult, Topic};
use crate::topic_cache::TopicCache;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

/// Common interface shared by the bare registry and its decorators
/// (spec §4.4: "decorators are compositional and must not change
/// semantics"). Lets `MetricsHeadCache`/`LoggingHeadCache` wrap any
/// `HeadCacheApi`, including each other.
#[async_trait]
pub trait HeadCacheApi: Send + Sync {
    async fn get(
        &self,
        topic: &Topic,
        id: AggregateId,
        partition: Partition,
        offset: Offset,
    ) -> Result<QueryResult>;

    /// Tear down every live `TopicCache`. Subsequent `get` calls fail
    /// with [`HeadCacheError::Closed`]. Returns one result per topic
    /// that was live at the moment of closing.
    async fn close(&self) -> Vec<Result<()>>;
}

/// One cell in the registry: either a `TopicCache` under construction,
/// a live one, or a construction failure remembered so repeated queries
/// don't keep retrying a topic with no discoverable partitions.
enum Cell {
    Ready(Arc<TopicCache>),
    Failed(String),
}

/// Collaborators needed to construct a `TopicCache`, bundled so the
/// registry doesn't need a type parameter per topic.
pub struct Collaborators {
    pub consumer: Arc<dyn LogConsumer>,
    pub eventual: Arc<dyn EventualPointers>,
}

/// The bare registry (spec §4.4). One `TopicCache` is created per
/// distinct topic, on first query, and shared by every caller for that
/// topic thereafter.
pub struct HeadCache {
    topics: DashMap<Topic, Arc<AsyncMutex<Option<Cell>>>>,
    collaborators: Arc<dyn Fn(&Topic) -> Collaborators + Send + Sync>,
    config: HeadCacheConfig,
    metrics: Arc<dyn Metrics>,
    closed: AtomicBool,
}

impl HeadCache {
    /// `collaborators` is invoked once per topic, the first time it is
    /// queried, to obtain that topic's [`LogConsumer`]/[`EventualPointers`]
    /// pair. Kept as a factory (rather than a single fixed pair) because a
    /// single consumer/eventual-pointer client is commonly shared and
    /// re-scoped per topic by the embedding application.
    pub fn new(
        config: HeadCacheConfig,
        metrics: Arc<dyn Metrics>,
        collaborators: impl Fn(&Topic) -> Collaborators + Send + Sync + 'static,
    ) -> Self {
        Self {
            topics: DashMap::new(),
            collaborators: Arc::new(collaborators),
            config,
            metrics,
            closed: AtomicBool::new(false),
        }
    }

    async fn topic_cache(&self, topic: &Topic) -> Result<Arc<TopicCache>> {
        let slot = self
            .topics
            .entry(topic.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
            .clone();

        let mut guard = slot.lock().await;
        match &*guard {
            // A poisoned TopicCache (spec §7 kind 2) stays poisoned and
            // keeps failing its own queries open with `Invalid` until
            // the registry tears it down on `close` — it is not
            // recreated behind the caller's back.
            Some(Cell::Ready(cache)) => Ok(Arc::clone(cache)),
            Some(Cell::Failed(_)) | None => {
                let Collaborators { consumer, eventual } = (self.collaborators)(topic);
                match TopicCache::new(
                    topic.clone(),
                    consumer,
                    eventual,
                    self.config.clone(),
                    Arc::clone(&self.metrics),
                )
                .await
                {
                    Ok(cache) => {
                        *guard = Some(Cell::Ready(Arc::clone(&cache)));
                        Ok(cache)
                    }
                    Err(err) => {
                        *guard = Some(Cell::Failed(err.to_string()));
                        Err(err)
                    }
                }
            }
        }
    }
}

#[async_trait]
impl HeadCacheApi for HeadCache {
    async fn get(
        &self,
        topic: &Topic,
        id: AggregateId,
        partition: Partition,
        offset: Offset,
    ) -> Result<QueryResult> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HeadCacheError::Closed);
        }
        let cache = self.topic_cache(topic).await?;
        Ok(cache.get(id, partition, offset).await)
    }

    async fn close(&self) -> Vec<Result<()>> {
        self.closed.store(true, Ordering::SeqCst);

        let slots: Vec<_> = self
            .topics
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        join_all(slots.into_iter().map(|slot| async move {
            // Explicitly abort both background tasks and fail open any
            // query still parked behind a listener, rather than relying
            // on this being the last `Arc<TopicCache>` reference — a
            // still-suspended query also holds a strong `Arc` via its
            // `ListenerGuard`, so teardown must not wait for `Drop`.
            let mut guard = slot.lock().await;
            if let Some(Cell::Ready(cache)) = guard.take() {
                cache.shutdown();
            }
            Ok(())
        }))
        .await
    }
}
