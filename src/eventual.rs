//! Eventual Pointer source (C2, spec §4.2): supplies, on demand, the
//! per-partition offset up to which the journal has been durably
//! persisted for a topic.

use crate::error::EventualError;
use crate::model::{Offset, Partition, Topic};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Single operation. The returned map need not be causally consistent
/// with the log consumer — it is a monotone-non-decreasing
/// approximation. A partition absent from the map means "nothing
/// durable yet" for that partition.
#[async_trait]
pub trait EventualPointers: Send + Sync {
    async fn pointers(&self, topic: &Topic) -> Result<HashMap<Partition, Offset>, EventualError>;
}

/// In-memory test double. Test harnesses call
/// [`MockEventualPointers::set`] to advance the durable pointer the way
/// a real durable store's replication would.
#[derive(Default)]
pub struct MockEventualPointers {
    pointers: RwLock<HashMap<Partition, Offset>>,
}

impl MockEventualPointers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, partition: Partition, offset: Offset) {
        self.pointers.write().insert(partition, offset);
    }
}

#[async_trait]
impl EventualPointers for MockEventualPointers {
    async fn pointers(&self, _topic: &Topic) -> Result<HashMap<Partition, Offset>, EventualError> {
        Ok(self.pointers.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_partition_means_nothing_durable() {
        let source = MockEventualPointers::new();
        source.set(Partition(0), Offset(10));
        let pointers = source.pointers(&"t".to_string()).await.unwrap();
        assert_eq!(pointers.get(&Partition(0)), Some(&Offset(10)));
        assert_eq!(pointers.get(&Partition(1)), None);
    }
}
