//! Compositional decorators over [`HeadCacheApi`] (spec §4.4): metrics
//! recording and structured logging, each wrapping any other
//! implementer (including each other) without altering `get`/`close`
//! semantics. Grounded on the teacher's `SlotManager` trait having more
//! than one implementer wired through the same call sites.

use crate::error::Result;
use crate::metrics::{Metrics, Outcome};
use crate::model::{AggregateId, JournalInfo, Offset, Partition, QueryResult, Topic};
use crate::registry::HeadCacheApi;
use async_trait::async_trait;
use std::time::Instant;

/// Wraps any [`HeadCacheApi`] and records the `get` metric (spec §6):
/// latency and outcome classification.
pub struct MetricsHeadCache<R: HeadCacheApi> {
    inner: R,
    metrics: std::sync::Arc<dyn Metrics>,
}

impl<R: HeadCacheApi> MetricsHeadCache<R> {
    pub fn new(inner: R, metrics: std::sync::Arc<dyn Metrics>) -> Self {
        Self { inner, metrics }
    }
}

#[async_trait]
impl<R: HeadCacheApi> HeadCacheApi for MetricsHeadCache<R> {
    async fn get(
        &self,
        topic: &Topic,
        id: AggregateId,
        partition: Partition,
        offset: Offset,
    ) -> Result<QueryResult> {
        let started = Instant::now();
        let result = self.inner.get(topic, id, partition, offset).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let outcome = match &result {
            Ok(QueryResult::Valid(JournalInfo::Empty)) => Outcome::Replicated,
            Ok(QueryResult::Valid(JournalInfo::NonEmpty(_))) => Outcome::NotReplicated,
            Ok(QueryResult::Invalid) => Outcome::Invalid,
            Err(_) => Outcome::Failure,
        };
        self.metrics.get(topic, latency_ms, outcome);
        result
    }

    async fn close(&self) -> Vec<Result<()>> {
        self.inner.close().await
    }
}

/// Wraps any [`HeadCacheApi`] and logs each `get`/`close` call at a
/// level matching its outcome (errors at `warn`, everything else at
/// `debug`) — a shape kept deliberately small since the embedding
/// application almost always wants its own wrapper around this one.
pub struct LoggingHeadCache<R: HeadCacheApi> {
    inner: R,
}

impl<R: HeadCacheApi> LoggingHeadCache<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<R: HeadCacheApi> HeadCacheApi for LoggingHeadCache<R> {
    async fn get(
        &self,
        topic: &Topic,
        id: AggregateId,
        partition: Partition,
        offset: Offset,
    ) -> Result<QueryResult> {
        let result = self.inner.get(topic, id.clone(), partition, offset).await;
        match &result {
            Ok(outcome) => {
                tracing::debug!(topic = %topic, %id, %partition, %offset, ?outcome, "head cache query")
            }
            Err(err) => {
                tracing::warn!(topic = %topic, %id, %partition, %offset, error = %err, "head cache query failed")
            }
        }
        result
    }

    async fn close(&self) -> Vec<Result<()>> {
        let results = self.inner.close().await;
        let failures = results.iter().filter(|r| r.is_err()).count();
        if failures > 0 {
            tracing::warn!(failures, "head cache close completed with errors");
        } else {
            tracing::info!("head cache closed");
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeadCacheConfig;
    use crate::consumer::MockLogConsumer;
    use crate::error::HeadCacheError;
    use crate::eventual::MockEventualPointers;
    use crate::metrics::{AtomicMetrics, NoopMetrics};
    use crate::registry::{Collaborators, HeadCache};
    use std::sync::Arc;
    use std::time::Duration;

    fn test_config() -> HeadCacheConfig {
        HeadCacheConfig {
            poll_timeout: Duration::from_millis(1),
            clean_interval: Duration::from_secs(60),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn metrics_decorator_records_failure_outcome() {
        let metrics = Arc::new(AtomicMetrics::new());
        let registry = HeadCache::new(test_config(), Arc::new(NoopMetrics), |topic| {
            Collaborators {
                consumer: Arc::new(MockLogConsumer::new(topic.clone())),
                eventual: Arc::new(MockEventualPointers::new()),
            }
        });
        let decorated = MetricsHeadCache::new(registry, metrics.clone());

        let err = decorated
            .get(&"t".to_string(), AggregateId::from("a"), Partition(0), Offset(0))
            .await
            .unwrap_err();
        assert!(matches!(err, HeadCacheError::PartitionDiscoveryFailed { .. }));
        assert_eq!(metrics.outcome_count(Outcome::Failure), 1);
        assert_eq!(metrics.gets(), 1);
    }

    #[tokio::test]
    async fn decorators_compose_without_changing_the_result() {
        let metrics = Arc::new(AtomicMetrics::new());
        let registry = HeadCache::new(test_config(), Arc::new(NoopMetrics), |topic| {
            Collaborators {
                consumer: Arc::new(MockLogConsumer::new(topic.clone())),
                eventual: Arc::new(MockEventualPointers::new()),
            }
        });
        let decorated = LoggingHeadCache::new(MetricsHeadCache::new(registry, metrics.clone()));

        let err = decorated
            .get(&"t".to_string(), AggregateId::from("a"), Partition(0), Offset(0))
            .await
            .unwrap_err();
        assert!(matches!(err, HeadCacheError::PartitionDiscoveryFailed { .. }));
        assert_eq!(metrics.gets(), 1);
    }
}
