//! End-to-end scenarios against a real `TopicCache` driven through mock
//! collaborators, no registry involved. Each test below corresponds to
//! one scenario, in order.

use head_cache::config::HeadCacheConfig;
use head_cache::consumer::MockLogConsumer;
use head_cache::eventual::MockEventualPointers;
use head_cache::metrics::NoopMetrics;
use head_cache::model::{
    AggregateId, JournalAction, JournalInfo, NonEmptyInfo, Offset, Partition, QueryResult, Record,
    SeqNr, SeqRange,
};
use head_cache::topic_cache::TopicCache;
use std::sync::{Arc, Once};
use std::time::Duration;

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn record(id: &str, offset: u64, action: JournalAction) -> Record {
    Record {
        id: AggregateId::from(id),
        timestamp: chrono::Utc::now(),
        offset: Offset(offset),
        header: action.encode(),
    }
}

fn config() -> HeadCacheConfig {
    HeadCacheConfig {
        poll_timeout: Duration::from_millis(1),
        clean_interval: Duration::from_secs(3600),
        max_size: 4,
        ..Default::default()
    }
}

async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn scenario_1_empty_after_delete() {
    init_tracing();
    let consumer = Arc::new(MockLogConsumer::new("t").with_partitions([Partition(0)]));
    let eventual = Arc::new(MockEventualPointers::new());
    eventual.set(Partition(0), Offset(10));

    consumer.push(
        Partition(0),
        record(
            "A",
            11,
            JournalAction::Append {
                range: SeqRange { from: SeqNr(1), to: SeqNr(2) },
            },
        ),
    );
    consumer.push(
        Partition(0),
        record(
            "A",
            12,
            JournalAction::Append {
                range: SeqRange { from: SeqNr(3), to: SeqNr(4) },
            },
        ),
    );
    consumer.push(Partition(0), record("A", 13, JournalAction::Delete { up_to: SeqNr(4) }));

    let cache = TopicCache::new("t".to_string(), consumer, eventual, config(), Arc::new(NoopMetrics))
        .await
        .unwrap();
    settle().await;

    let result = cache.get(AggregateId::from("A"), Partition(0), Offset(13)).await;
    assert_eq!(result, QueryResult::Valid(JournalInfo::Empty));
}

#[tokio::test]
async fn scenario_2_non_empty_visible() {
    init_tracing();
    let consumer = Arc::new(MockLogConsumer::new("t").with_partitions([Partition(0)]));
    let eventual = Arc::new(MockEventualPointers::new());

    consumer.push(
        Partition(0),
        record(
            "B",
            20,
            JournalAction::Append {
                range: SeqRange { from: SeqNr(1), to: SeqNr(5) },
            },
        ),
    );

    let cache = TopicCache::new("t".to_string(), consumer, eventual, config(), Arc::new(NoopMetrics))
        .await
        .unwrap();
    settle().await;

    let result = cache.get(AggregateId::from("B"), Partition(0), Offset(20)).await;
    assert_eq!(
        result,
        QueryResult::Valid(JournalInfo::NonEmpty(NonEmptyInfo {
            seq_nr: SeqNr(5),
            delete_to: None,
        }))
    );
}

#[tokio::test]
async fn scenario_3_behind_then_listener_wakes() {
    init_tracing();
    let consumer = Arc::new(MockLogConsumer::new("t").with_partitions([Partition(0)]));
    let eventual = Arc::new(MockEventualPointers::new());

    // Get the partition to offset 30 first, with no record for "C".
    consumer.push(
        Partition(0),
        record(
            "other",
            30,
            JournalAction::Append {
                range: SeqRange { from: SeqNr(1), to: SeqNr(1) },
            },
        ),
    );

    let cache = TopicCache::new("t".to_string(), consumer.clone(), eventual, config(), Arc::new(NoopMetrics))
        .await
        .unwrap();
    settle().await;

    // Query is Behind (partition offset 30 < requested 50); spawn it so
    // the ingest loop can make progress concurrently.
    let query = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.get(AggregateId::from("C"), Partition(0), Offset(50)).await })
    };
    settle().await;

    // Advance partition 0 to offset 50 with no action for "C".
    consumer.push(
        Partition(0),
        record(
            "other",
            50,
            JournalAction::Append {
                range: SeqRange { from: SeqNr(1), to: SeqNr(1) },
            },
        ),
    );
    settle().await;

    let result = query.await.unwrap();
    assert_eq!(result, QueryResult::Valid(JournalInfo::Empty));
}

#[tokio::test]
async fn scenario_4_trimmed_partition_returns_invalid() {
    init_tracing();
    let consumer = Arc::new(
        MockLogConsumer::new("t").with_partitions([Partition(0), Partition(1)]),
    );
    let eventual = Arc::new(MockEventualPointers::new());

    for partition in [Partition(0), Partition(1)] {
        for i in 0..5u64 {
            consumer.push(
                partition,
                record(
                    &format!("id-{}-{}", partition.0, i),
                    100 + i,
                    JournalAction::Append {
                        range: SeqRange { from: SeqNr(1), to: SeqNr(1) },
                    },
                ),
            );
        }
    }

    let cache = TopicCache::new("t".to_string(), consumer, eventual, config(), Arc::new(NoopMetrics))
        .await
        .unwrap();
    settle().await;

    assert_eq!(
        Arc::clone(&cache)
            .get(AggregateId::from("X"), Partition(0), Offset(104))
            .await,
        QueryResult::Invalid
    );
    assert_eq!(
        cache.get(AggregateId::from("X"), Partition(0), Offset(103)).await,
        QueryResult::Invalid
    );
}

#[tokio::test]
async fn scenario_5_cleanup_evicts_below_pointer() {
    init_tracing();
    let consumer = Arc::new(MockLogConsumer::new("t").with_partitions([Partition(0)]));
    let eventual = Arc::new(MockEventualPointers::new());

    for (id, offset) in [("a", 10u64), ("b", 20), ("c", 30)] {
        consumer.push(
            Partition(0),
            record(
                id,
                offset,
                JournalAction::Append {
                    range: SeqRange { from: SeqNr(1), to: SeqNr(1) },
                },
            ),
        );
    }

    let cache = TopicCache::new(
        "t".to_string(),
        consumer,
        Arc::clone(&eventual),
        HeadCacheConfig {
            poll_timeout: Duration::from_millis(1),
            clean_interval: Duration::from_millis(5),
            max_size: 100,
            ..Default::default()
        },
        Arc::new(NoopMetrics),
    )
    .await
    .unwrap();
    settle().await;

    eventual.set(Partition(0), Offset(20));
    tokio::time::sleep(Duration::from_millis(30)).await;

    let result = cache.get(AggregateId::from("c"), Partition(0), Offset(30)).await;
    assert_eq!(
        result,
        QueryResult::Valid(JournalInfo::NonEmpty(NonEmptyInfo {
            seq_nr: SeqNr(1),
            delete_to: None,
        }))
    );
}

#[tokio::test]
async fn scenario_6_mark_does_not_advance_entry_offset() {
    init_tracing();
    let consumer = Arc::new(MockLogConsumer::new("t").with_partitions([Partition(0)]));
    let eventual = Arc::new(MockEventualPointers::new());

    consumer.push(
        Partition(0),
        record(
            "D",
            40,
            JournalAction::Append {
                range: SeqRange { from: SeqNr(1), to: SeqNr(1) },
            },
        ),
    );
    consumer.push(Partition(0), record("D", 41, JournalAction::Mark { id: "m".to_string() }));

    let cache = TopicCache::new("t".to_string(), consumer, eventual, config(), Arc::new(NoopMetrics))
        .await
        .unwrap();
    settle().await;

    let result = cache.get(AggregateId::from("D"), Partition(0), Offset(41)).await;
    assert_eq!(
        result,
        QueryResult::Valid(JournalInfo::NonEmpty(NonEmptyInfo {
            seq_nr: SeqNr(1),
            delete_to: None,
        }))
    );
}

#[tokio::test]
async fn poisoned_ingest_loop_wakes_pending_listener_with_invalid() {
    init_tracing();
    let consumer = Arc::new(MockLogConsumer::new("t").with_partitions([Partition(0)]));
    let eventual = Arc::new(MockEventualPointers::new());

    let cache = TopicCache::new(
        "t".to_string(),
        consumer.clone(),
        eventual,
        config(),
        Arc::new(NoopMetrics),
    )
    .await
    .unwrap();
    settle().await;

    // Partition offset starts at 0; this query is Behind and registers
    // a listener.
    let query = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.get(AggregateId::from("Z"), Partition(0), Offset(5)).await })
    };
    settle().await;

    // Next poll fails: the ingest loop must poison the cache and fail
    // open every pending listener instead of leaving the query hanging.
    consumer.fail_next_poll("connection reset");
    settle().await;

    let result = tokio::time::timeout(Duration::from_secs(1), query)
        .await
        .expect("pending query must not hang after the ingest loop is poisoned")
        .unwrap();
    assert_eq!(result, QueryResult::Invalid);
    assert!(cache.is_failed());
}

#[tokio::test]
async fn registry_close_stops_the_ingest_loop_and_wakes_pending_queries() {
    init_tracing();
    let consumer = Arc::new(MockLogConsumer::new("t").with_partitions([Partition(0)]));
    let eventual = Arc::new(MockEventualPointers::new());

    let registry = head_cache::registry::HeadCache::new(config(), Arc::new(NoopMetrics), {
        let consumer = Arc::clone(&consumer);
        let eventual = Arc::clone(&eventual);
        move |_topic| head_cache::registry::Collaborators {
            consumer: Arc::clone(&consumer) as Arc<dyn head_cache::consumer::LogConsumer>,
            eventual: Arc::clone(&eventual) as Arc<dyn head_cache::eventual::EventualPointers>,
        }
    });

    use head_cache::registry::HeadCacheApi;

    let topic = "t".to_string();
    registry
        .get(&topic, AggregateId::from("a"), Partition(0), Offset(0))
        .await
        .unwrap();
    settle().await;

    // Drive a Behind query and `close()` concurrently, in the same task:
    // the query registers a listener and then suspends on its first
    // poll, at which point `close_fut`'s own `settle()` gets to run and
    // tear the registry down. The query must be woken with `Invalid`
    // rather than hang forever.
    let query_fut = registry.get(&topic, AggregateId::from("Z"), Partition(0), Offset(5));
    let close_fut = async {
        settle().await;
        registry.close().await
    };
    let (query_result, _close_results) = tokio::join!(query_fut, close_fut);
    assert_eq!(query_result.unwrap(), QueryResult::Invalid);

    // Give any in-flight poll a moment to finish, then confirm no new
    // ones were issued — the ingest loop has actually stopped running,
    // not merely been asked to.
    let poll_count_after_close = consumer.poll_count();
    settle().await;
    assert_eq!(
        consumer.poll_count(),
        poll_count_after_close,
        "ingest loop kept polling after HeadCache::close"
    );
}
