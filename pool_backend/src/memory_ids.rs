//! Central registry for stable memory IDs.
//!
//! IMPORTANT: All memory IDs must be unique across the entire canister.
//! Run `cargo test` to verify no collisions exist.
//!
//! Allocation strategy:
//! - 10-19: Accounting (user balances, LP shares, pool state)
//! - 20-29: Withdrawal & audit (pending, audit log map + counter)
//! - 40-49: Configuration (admin registry)

// Accounting (10-19)
pub const USER_BALANCES_MEMORY_ID: u8 = 10;
pub const LP_SHARES_MEMORY_ID: u8 = 11;
pub const POOL_STATE_MEMORY_ID: u8 = 13;

// Withdrawals & audit (20-29)
pub const PENDING_WITHDRAWALS_MEMORY_ID: u8 = 20;
pub const AUDIT_LOG_MAP_MEMORY_ID: u8 = 24;
pub const AUDIT_LOG_COUNTER_MEMORY_ID: u8 = 25;

// Configuration (40-49)
pub const ADMIN_CONFIG_MEMORY_ID: u8 = 40;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_ids_are_unique() {
        let ids = [
            USER_BALANCES_MEMORY_ID,
            LP_SHARES_MEMORY_ID,
            POOL_STATE_MEMORY_ID,
            PENDING_WITHDRAWALS_MEMORY_ID,
            AUDIT_LOG_MAP_MEMORY_ID,
            AUDIT_LOG_COUNTER_MEMORY_ID,
            ADMIN_CONFIG_MEMORY_ID,
        ];

        let mut sorted = ids;
        sorted.sort();
        for i in 1..sorted.len() {
            assert_ne!(
                sorted[i - 1],
                sorted[i],
                "Duplicate memory ID found: {}",
                sorted[i]
            );
        }
    }
}
