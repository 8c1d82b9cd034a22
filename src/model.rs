//! Core data types for the journal head index: identifiers, journal
//! actions, and the combine laws that fold and merge them (spec §3).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Topic name. Kept as a bare `String` rather than a newtype since it is
/// only ever used as a map key / log lookup key, never arithmetic.
pub type Topic = String;

/// Aggregate identifier (`Id` in the spec).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggregateId(pub String);

impl fmt::Display for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AggregateId {
    fn from(s: &str) -> Self {
        AggregateId(s.to_string())
    }
}

impl From<String> for AggregateId {
    fn from(s: String) -> Self {
        AggregateId(s)
    }
}

/// Log partition number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Partition(pub u32);

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position within a partition. Monotone and dense within the partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Offset(pub u64);

impl Offset {
    pub fn max(self, other: Offset) -> Offset {
        Offset(self.0.max(other.0))
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-aggregate sequence number, carried inside journal actions.
/// Unrelated to log `Offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeqNr(pub u64);

impl SeqNr {
    pub fn max(self, other: SeqNr) -> SeqNr {
        SeqNr(self.0.max(other.0))
    }
}

/// Inclusive `[from, to]` range of monotone per-aggregate sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeqRange {
    pub from: SeqNr,
    pub to: SeqNr,
}

/// A single journal action carried in a log record's header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JournalAction {
    Append { range: SeqRange },
    Delete { up_to: SeqNr },
    Mark { id: String },
}

impl JournalAction {
    /// Decode a record header. Adapters are expected to drop anything
    /// that fails to decode rather than propagate the error (spec §4.1).
    pub fn decode(bytes: &[u8]) -> Option<JournalAction> {
        serde_json::from_slice(bytes).ok()
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("JournalAction always serializes")
    }
}

/// `NonEmpty`'s payload: largest append upper-bound seen, and an optional
/// delete watermark that is always `<= seq_nr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonEmptyInfo {
    pub seq_nr: SeqNr,
    pub delete_to: Option<SeqNr>,
}

impl NonEmptyInfo {
    /// Field-wise maximum combine (§3, P7). Returns `None` when the
    /// combined delete watermark now covers the combined `seq_nr`
    /// entirely, i.e. the result collapses to `Empty`.
    pub fn combine(self, other: NonEmptyInfo) -> Option<NonEmptyInfo> {
        let seq_nr = self.seq_nr.max(other.seq_nr);
        let delete_to = match (self.delete_to, other.delete_to) {
            (None, None) => None,
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (Some(a), Some(b)) => Some(a.max(b)),
        };
        if let Some(d) = delete_to {
            if d >= seq_nr {
                return None;
            }
        }
        Some(NonEmptyInfo { seq_nr, delete_to })
    }
}

/// Summary of what is currently known about an aggregate's head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalInfo {
    /// No `Append` has been observed, or every observed `Append` was
    /// fully covered by a later `Delete`.
    Empty,
    NonEmpty(NonEmptyInfo),
}

impl JournalInfo {
    /// Fold a single action into an in-progress accumulator. `None`
    /// represents `Empty`. Folding is sequential and assumes actions
    /// arrive in the log's own offset order; it is not required to be
    /// commutative (unlike [`NonEmptyInfo::combine`], used to merge
    /// already-folded entries across batches).
    pub fn fold_action(acc: Option<NonEmptyInfo>, action: &JournalAction) -> Option<NonEmptyInfo> {
        match action {
            JournalAction::Append { range } => Some(match acc {
                None => NonEmptyInfo {
                    seq_nr: range.to,
                    delete_to: None,
                },
                Some(cur) => NonEmptyInfo {
                    seq_nr: cur.seq_nr.max(range.to),
                    delete_to: cur.delete_to,
                },
            }),
            JournalAction::Delete { up_to } => match acc {
                None => None,
                Some(cur) => {
                    let clamped = if up_to.0 < cur.seq_nr.0 {
                        *up_to
                    } else {
                        cur.seq_nr
                    };
                    let new_delete_to = match cur.delete_to {
                        Some(d) => d.max(clamped),
                        None => clamped,
                    };
                    if new_delete_to.0 >= cur.seq_nr.0 {
                        None
                    } else {
                        Some(NonEmptyInfo {
                            seq_nr: cur.seq_nr,
                            delete_to: Some(new_delete_to),
                        })
                    }
                }
            },
            // Marks never advance seqNr or the delete watermark.
            JournalAction::Mark { .. } => acc,
        }
    }
}

/// One aggregate's folded state within a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: AggregateId,
    /// Largest log offset among the `Append`/`Delete` actions folded
    /// into `info`. Marks never advance this.
    pub offset: Offset,
    pub info: NonEmptyInfo,
}

impl Entry {
    /// Combine two views of the same aggregate's entry (max-offset,
    /// info-combine). Returns `None` if the combined info collapses to
    /// `Empty` — callers must then drop the entry from the map
    /// (invariant #2: `Empty` entries are never stored).
    pub fn combine(self, other: Entry) -> Option<Entry> {
        debug_assert_eq!(self.id, other.id);
        let offset = self.offset.max(other.offset);
        let info = self.info.combine(other.info)?;
        Some(Entry {
            id: self.id,
            offset,
            info,
        })
    }
}

/// Per-partition state: the max log offset seen, the folded entries for
/// every aggregate currently cacheable, and the trim watermark.
#[derive(Debug, Clone)]
pub struct PartitionEntry {
    pub partition: Partition,
    /// Max log offset seen for this partition, across any action type.
    pub offset: Offset,
    pub entries: HashMap<AggregateId, Entry>,
    /// Offset up to which entries were evicted by size-based trimming.
    /// While set, queries at or below it must answer `Invalid` (unknown).
    pub trimmed: Option<Offset>,
}

impl PartitionEntry {
    pub fn empty(partition: Partition, offset: Offset) -> Self {
        Self {
            partition,
            offset,
            entries: HashMap::new(),
            trimmed: None,
        }
    }
}

/// Result of a [`crate::registry::HeadCache::get`] query (spec §4.4, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryResult {
    /// The journal cannot be answered from memory: unassigned partition,
    /// a trimmed watermark covering the query, or a failed TopicCache.
    Invalid,
    Valid(JournalInfo),
}

/// A decoded log record, after the adapter boundary has parsed the
/// header (spec §4.1). `header` carries the raw bytes so tests and
/// adapters can exercise the decode path explicitly.
#[derive(Debug, Clone)]
pub struct Record {
    pub id: AggregateId,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub offset: Offset,
    pub header: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(seq: u64, del: Option<u64>) -> NonEmptyInfo {
        NonEmptyInfo {
            seq_nr: SeqNr(seq),
            delete_to: del.map(SeqNr),
        }
    }

    #[test]
    fn combine_is_commutative() {
        let a = info(5, Some(2));
        let b = info(8, Some(1));
        assert_eq!(a.combine(b), b.combine(a));
    }

    #[test]
    fn combine_is_associative() {
        let a = info(5, None);
        let b = info(3, Some(3));
        let c = info(9, Some(4));

        let ab_c = a.combine(b).unwrap().combine(c);
        let a_bc = a.combine(b.combine(c).unwrap());
        assert_eq!(ab_c, a_bc);
    }

    #[test]
    fn combine_collapses_to_empty_when_delete_covers_seq_nr() {
        let a = info(4, None);
        let b = info(4, Some(4));
        assert_eq!(a.combine(b), None);
    }

    #[test]
    fn fold_append_then_full_delete_is_empty() {
        let mut acc = None;
        acc = JournalInfo::fold_action(
            acc,
            &JournalAction::Append {
                range: SeqRange {
                    from: SeqNr(1),
                    to: SeqNr(2),
                },
            },
        );
        acc = JournalInfo::fold_action(
            acc,
            &JournalAction::Append {
                range: SeqRange {
                    from: SeqNr(3),
                    to: SeqNr(4),
                },
            },
        );
        acc = JournalInfo::fold_action(acc, &JournalAction::Delete { up_to: SeqNr(4) });
        assert_eq!(acc, None);
    }

    #[test]
    fn fold_mark_does_not_change_info() {
        let acc = Some(info(1, None));
        let folded = JournalInfo::fold_action(
            acc,
            &JournalAction::Mark {
                id: "m".to_string(),
            },
        );
        assert_eq!(folded, acc);
    }

    #[test]
    fn journal_action_round_trips_through_json() {
        let action = JournalAction::Append {
            range: SeqRange {
                from: SeqNr(1),
                to: SeqNr(5),
            },
        };
        let bytes = action.encode();
        assert_eq!(JournalAction::decode(&bytes), Some(action));
    }

    #[test]
    fn journal_action_decode_rejects_garbage() {
        assert_eq!(JournalAction::decode(b"not json"), None);
    }
}
