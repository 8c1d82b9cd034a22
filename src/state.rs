//! Per-topic `State`: the partition-keyed entry maps, their merge/trim
//! step (spec §4.3.4), cleanup eviction (§4.3.3), and the query decision
//! table (§4.3.5). Pure functions over plain data — the owning
//! `TopicCache` (in `topic_cache.rs`) is what actually serializes access.

use crate::model::{AggregateId, JournalInfo, Offset, Partition, PartitionEntry, QueryResult};
use std::collections::HashMap;

pub type Entries = HashMap<Partition, PartitionEntry>;

/// `State` (spec §3): the partition-keyed entry maps for one topic.
/// Listeners are tracked alongside this in `TopicCache`, not here —
/// keeping `State` a plain, cloneable snapshot value lets `get()` read
/// one outside any lock (spec §4.3.6).
#[derive(Debug, Clone, Default)]
pub struct State {
    pub entries: Entries,
}

impl State {
    pub fn new(entries: Entries) -> Self {
        Self { entries }
    }

    pub fn entry_count(&self) -> usize {
        self.entries.values().map(|p| p.entries.len()).sum()
    }
}

/// Outcome of evaluating the query decision table against a snapshot
/// (spec §4.3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Answer(QueryResult),
    /// The partition's tracked offset hasn't reached the query's target
    /// offset yet; a listener must be registered.
    Behind,
}

/// The query decision table (spec §4.3.5), reused both for the
/// synchronous fast path of `get()` and for re-evaluating pending
/// listeners on every state update.
pub fn decide(
    entries: &Entries,
    id: &AggregateId,
    partition: Partition,
    offset: Offset,
) -> Decision {
    let Some(partition_entry) = entries.get(&partition) else {
        return Decision::Answer(QueryResult::Invalid);
    };
    if partition_entry.offset.0 < offset.0 {
        return Decision::Behind;
    }
    match partition_entry.entries.get(id) {
        Some(entry) => Decision::Answer(QueryResult::Valid(JournalInfo::NonEmpty(entry.info))),
        None => match partition_entry.trimmed {
            None => Decision::Answer(QueryResult::Valid(JournalInfo::Empty)),
            Some(_) => Decision::Answer(QueryResult::Invalid),
        },
    }
}

/// Merge a freshly-polled batch (`new`) into `old`, then trim if the
/// combined total exceeds `max_size` (spec §4.3.4).
///
/// Trimming is coarse by design: for any partition whose merged entry
/// count exceeds `max_size / partition_count`, *all* of that partition's
/// entries are dropped and `trimmed` is set to the max offset among the
/// dropped entries. The partition's own tracked `offset` is unaffected.
pub fn combine_and_trim(old: &Entries, new: Entries, max_size: usize) -> Entries {
    let mut merged = old.clone();

    for (partition, new_partition_entry) in new {
        match merged.get_mut(&partition) {
            Some(existing) => merge_partition_entry(existing, new_partition_entry),
            None => {
                merged.insert(partition, new_partition_entry);
            }
        }
    }

    let total: usize = merged.values().map(|p| p.entries.len()).sum();
    if total <= max_size || merged.is_empty() {
        return merged;
    }

    let per_partition_cap = (max_size / merged.len()).max(1);
    for partition_entry in merged.values_mut() {
        if partition_entry.entries.len() > per_partition_cap {
            let max_offset = partition_entry
                .entries
                .values()
                .map(|e| e.offset)
                .max()
                .unwrap_or(partition_entry.offset);
            partition_entry.entries.clear();
            partition_entry.trimmed = Some(max_offset);
        }
    }

    merged
}

fn merge_partition_entry(existing: &mut PartitionEntry, incoming: PartitionEntry) {
    existing.offset = existing.offset.max(incoming.offset);
    for (id, incoming_entry) in incoming.entries {
        match existing.entries.remove(&id) {
            Some(current) => {
                if let Some(combined) = current.combine(incoming_entry) {
                    existing.entries.insert(id, combined);
                }
                // else: combined info collapsed to Empty — drop (inv #2).
            }
            None => {
                existing.entries.insert(id, incoming_entry);
            }
        }
    }
    // `trimmed` is left untouched by ingest merges; only cleanup clears it.
}

/// Apply the durable-pointer cutoff from C2 (spec §4.3.3): for each
/// partition present in `pointers`, drop entries whose offset is `<=`
/// the pointer, and clear `trimmed` if it is now `<=` the pointer.
/// Partitions absent from `pointers` are left untouched (Design Note
/// 9(c)). Returns the number of entries removed. Idempotent (P6):
/// applying the same `pointers` twice in a row removes nothing the
/// second time.
pub fn remove_until(entries: &mut Entries, pointers: &HashMap<Partition, Offset>) -> usize {
    let mut removed = 0;
    for (partition, pointer) in pointers {
        let Some(partition_entry) = entries.get_mut(partition) else {
            continue;
        };
        let before = partition_entry.entries.len();
        partition_entry
            .entries
            .retain(|_, entry| entry.offset.0 > pointer.0);
        removed += before - partition_entry.entries.len();

        if let Some(trimmed) = partition_entry.trimmed {
            if trimmed.0 <= pointer.0 {
                partition_entry.trimmed = None;
            }
        }
    }
    removed
}
