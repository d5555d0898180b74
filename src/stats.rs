//! Stats snapshot: a point-in-time read of the slot table, shaped after
//! `pg_stat_get_wal_senders`'s lock-protected-copy-then-format pattern.

use crate::slots::{SenderState, SlotTable};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderStatRow {
    pub owner: u64,
    pub state: &'static str,
    pub sent_location: String,
}

/// Snapshots every occupied slot, in slot-index order. Each row's lock is
/// held only long enough to copy the fields; formatting happens outside the
/// lock.
pub fn snapshot(table: &SlotTable) -> Vec<SenderStatRow> {
    table
        .iter()
        .filter_map(|slot| {
            let (owner, state, sent_pos) = slot.snapshot();
            if owner == 0 {
                return None;
            }
            Some(SenderStatRow {
                owner,
                state: state.as_str(),
                sent_location: sent_pos.to_string(),
            })
        })
        .collect()
}
