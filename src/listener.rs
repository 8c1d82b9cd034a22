//! Pending listeners: queries that couldn't be answered from the
//! current snapshot and are waiting for the `TopicCache` to observe
//! enough records (spec §4.3.5, §5, P5).

use crate::model::{AggregateId, Offset, Partition, QueryResult};
use crate::state::{decide, Decision, Entries};
use tokio::sync::oneshot;

pub type ListenerId = u64;

/// A one-shot pending query. `evaluate`/`try_satisfy` re-run the
/// decision table (spec §4.3.5) on every state update; the first
/// non-`Behind` result completes the sender.
///
/// The sender is only ever consumed once (`Option::take`), so
/// [`Listener::try_satisfy`] is safe to call again on an
/// already-completed listener — matching spec §5's tolerance for "a
/// removed listener being invoked once."
pub struct Listener {
    pub listener_id: ListenerId,
    pub id: AggregateId,
    pub partition: Partition,
    pub offset: Offset,
    sender: Option<oneshot::Sender<QueryResult>>,
}

impl Listener {
    pub fn new(
        listener_id: ListenerId,
        id: AggregateId,
        partition: Partition,
        offset: Offset,
        sender: oneshot::Sender<QueryResult>,
    ) -> Self {
        Self {
            listener_id,
            id,
            partition,
            offset,
            sender: Some(sender),
        }
    }

    /// Returns `true` if this listener is now satisfied (the caller
    /// should remove it from the pending list).
    pub fn try_satisfy(&mut self, entries: &Entries) -> bool {
        match decide(entries, &self.id, self.partition, self.offset) {
            Decision::Behind => false,
            Decision::Answer(result) => {
                if let Some(sender) = self.sender.take() {
                    // The receiving query task may have been cancelled;
                    // a failed send is not an error here.
                    let _ = sender.send(result);
                }
                true
            }
        }
    }

    /// Complete this listener with `Invalid` regardless of the decision
    /// table. Used when the owning `TopicCache` is poisoned or torn down
    /// (spec §7 kind 2) and every pending query must fail open rather
    /// than wait on a state update that will never come.
    pub fn fail_open(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(QueryResult::Invalid);
        }
    }
}
