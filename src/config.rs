//! HeadCache configuration (spec §6). Plain struct + `Default`, the
//! teacher's `CacheConfig`/`CoreConfig` idiom — no external config-file
//! loader, the embedding application is expected to construct this
//! however it likes (env, file, literal) and pass it in.

use crate::error::{HeadCacheError, Result};
use std::time::Duration;

/// Fixed overrides applied on top of whatever consumer configuration the
/// embedding application passes to the log consumer adapter (spec §6):
/// earliest offsets, no consumer group, no auto-commit. Not user
/// tunable — kept as an explicit type so a call site can't forget to
/// apply them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsumerOverrides {
    pub earliest_offset: bool,
    pub group_id: Option<()>,
    pub auto_commit: bool,
}

impl ConsumerOverrides {
    pub const fn fixed() -> Self {
        Self {
            earliest_offset: true,
            group_id: None,
            auto_commit: false,
        }
    }
}

/// Top-level HeadCache configuration.
#[derive(Debug, Clone)]
pub struct HeadCacheConfig {
    /// Max wait inside one ingest poll. Default 10ms.
    pub poll_timeout: Duration,
    /// Period between cleanup cycles. Default 3s.
    pub clean_interval: Duration,
    /// Upper bound on total entry count across partitions, per topic.
    /// Default 100_000.
    pub max_size: usize,
    pub consumer_overrides: ConsumerOverrides,
}

impl Default for HeadCacheConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(10),
            clean_interval: Duration::from_secs(3),
            max_size: 100_000,
            consumer_overrides: ConsumerOverrides::fixed(),
        }
    }
}

impl HeadCacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(HeadCacheError::Configuration(
                "max_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
