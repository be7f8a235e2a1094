//! Append-only, size-bounded audit journal.
//!
//! Entries are keyed by a durable monotonic counter, so iteration order is
//! chronological even after the oldest entries have been pruned. No entry is
//! ever mutated after insertion.

use ic_stable_structures::memory_manager::MemoryId;
use ic_stable_structures::{StableBTreeMap, StableCell};
use std::cell::RefCell;

use crate::memory_ids::{AUDIT_LOG_COUNTER_MEMORY_ID, AUDIT_LOG_MAP_MEMORY_ID};
use crate::types::{AuditEntry, AuditEvent};
use crate::{Memory, MEMORY_MANAGER};

/// Hard bound on retained entries; oldest are pruned first.
pub const MAX_AUDIT_ENTRIES: u64 = 10_000;

thread_local! {
    static AUDIT_LOG: RefCell<StableBTreeMap<u64, AuditEntry, Memory>> = RefCell::new(
        StableBTreeMap::init(
            MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(AUDIT_LOG_MAP_MEMORY_ID)))
        )
    );

    // Next key to assign. Never reused, so keys stay strictly increasing
    // across pruning and upgrades.
    static AUDIT_COUNTER: RefCell<StableCell<u64, Memory>> = RefCell::new(
        StableCell::init(
            MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(AUDIT_LOG_COUNTER_MEMORY_ID))),
            0_u64
        ).expect("Failed to init audit log counter")
    );
}

/// Append an event, then prune down to `MAX_AUDIT_ENTRIES` by key order.
pub fn append(timestamp: u64, event: AuditEvent) {
    let key = AUDIT_COUNTER.with(|counter| {
        let mut cell = counter.borrow_mut();
        let key = *cell.get();
        cell.set(key + 1).expect("Failed to advance audit counter");
        key
    });

    AUDIT_LOG.with(|log| {
        let mut log = log.borrow_mut();
        log.insert(key, AuditEntry { timestamp, event });

        let len = log.len();
        if len > MAX_AUDIT_ENTRIES {
            let excess = (len - MAX_AUDIT_ENTRIES) as usize;
            let oldest: Vec<u64> = log.iter().take(excess).map(|(k, _)| k).collect();
            for k in oldest {
                log.remove(&k);
            }
        }
    });
}

/// Read entries in chronological (key) order.
pub fn read(offset: u64, limit: u64) -> Vec<AuditEntry> {
    AUDIT_LOG.with(|log| {
        log.borrow()
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|(_, entry)| entry)
            .collect()
    })
}

pub fn len() -> u64 {
    AUDIT_LOG.with(|log| log.borrow().len())
}

/// Total events ever appended, including pruned ones.
pub fn total_appended() -> u64 {
    AUDIT_COUNTER.with(|counter| *counter.borrow().get())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candid::Principal;

    fn push(n: u64) {
        for i in 0..n {
            append(
                i,
                AuditEvent::WithdrawalInitiated {
                    user: Principal::from_slice(&[1; 4]),
                    amount: i,
                },
            );
        }
    }

    #[test]
    fn entries_come_back_in_append_order() {
        push(5);
        let entries = read(0, 10);
        assert_eq!(entries.len(), 5);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.timestamp, i as u64);
        }
    }

    #[test]
    fn pagination_skips_and_limits() {
        push(10);
        let page = read(4, 3);
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].timestamp, 4);
        assert_eq!(page[2].timestamp, 6);

        // Reading past the end is empty, not an error
        assert!(read(100, 5).is_empty());
    }

    #[test]
    fn log_prunes_oldest_beyond_bound() {
        push(MAX_AUDIT_ENTRIES + 7);

        assert_eq!(len(), MAX_AUDIT_ENTRIES);
        assert_eq!(total_appended(), MAX_AUDIT_ENTRIES + 7);

        // The 7 oldest entries are gone; the survivor set starts at 7
        let entries = read(0, 1);
        assert_eq!(entries[0].timestamp, 7);

        // Order still chronological after pruning
        let all = read(0, MAX_AUDIT_ENTRIES);
        for pair in all.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
    }
}
