//! Approximate mirror of the canister's real ledger balance.
//!
//! The cache is advisory: it is incremented/decremented only on *confirmed*
//! transfers and periodically overwritten from ledger ground truth, so drift
//! from crashes or uncertain outcomes self-heals within one reconciliation
//! interval. It may be used to reject a payout, never to authorize one.

use std::cell::RefCell;
use std::time::Duration;

use crate::error::PoolError;
use crate::ledger;

/// How often to reconcile against the ledger (1 hour).
const RECONCILE_INTERVAL: Duration = Duration::from_secs(3600);

/// Payouts at or above this size get a cheap solvency pre-check before the
/// real transfer is attempted (100 USDT).
pub const LARGE_PAYOUT_THRESHOLD: u64 = 100_000_000;

#[derive(Clone, Copy, Debug, Default)]
pub struct CachedBalance {
    pub value: u64,
    pub last_reconciled_at: u64,
}

thread_local! {
    static CACHED_BALANCE: RefCell<CachedBalance> = RefCell::new(CachedBalance::default());
    static RECONCILE_TIMER_ID: RefCell<Option<ic_cdk_timers::TimerId>> = RefCell::new(None);
}

pub fn get() -> CachedBalance {
    CACHED_BALANCE.with(|c| *c.borrow())
}

/// Called only from the Success branch of a confirmed inbound transfer.
pub fn credit(amount: u64) {
    CACHED_BALANCE.with(|c| {
        let mut cache = c.borrow_mut();
        cache.value = cache.value.saturating_add(amount);
    });
}

/// Called only from the Success branch of a confirmed outbound transfer.
pub fn debit(amount: u64) {
    CACHED_BALANCE.with(|c| {
        let mut cache = c.borrow_mut();
        cache.value = cache.value.saturating_sub(amount);
    });
}

/// Full overwrite from ledger ground truth.
pub fn overwrite(value: u64, now: u64) {
    CACHED_BALANCE.with(|c| {
        *c.borrow_mut() = CachedBalance {
            value,
            last_reconciled_at: now,
        };
    });
}

/// Cheap pre-flight gate for large payouts: the cached balance must cover
/// both the payout and every obligation the canister is tracking (pool
/// reserve, betting balances, already-pending withdrawals).
///
/// The cache can be stale in either direction, so this only rejects when the
/// books clearly cannot be covered; it never replaces the real transfer's
/// own failure handling.
pub fn preflight_large_payout(payout: u64) -> Result<(), PoolError> {
    if payout < LARGE_PAYOUT_THRESHOLD {
        return Ok(());
    }
    let cached = get();
    if cached.value < payout {
        return Err(PoolError::validation(format!(
            "Payout {} exceeds cached canister balance {}. \
             Try again after the next balance reconciliation.",
            payout, cached.value
        )));
    }

    // The payout itself is already inside these terms at pre-flight time: a
    // balance withdrawal has not been debited yet, an LP payout is still
    // part of the reserve.
    let (_, pending_total) = crate::accounting::get_pending_stats_internal();
    let obligations = crate::liquidity_pool::get_pool_reserve()
        .saturating_add(crate::accounting::calculate_total_deposits_internal())
        .saturating_add(pending_total);
    if obligations > cached.value {
        return Err(PoolError::validation(format!(
            "Payout {} blocked: tracked obligations {} exceed cached canister \
             balance {}. Try again after the next balance reconciliation.",
            payout, obligations, cached.value
        )));
    }
    Ok(())
}

/// Overwrite the cache with the canister's true ledger balance.
/// Returns the fresh value, or the stale cached one if the query fails.
pub async fn reconcile() -> u64 {
    match ledger::query_ledger_balance().await {
        Ok(balance) => {
            overwrite(balance, ic_cdk::api::time());
            balance
        }
        Err(e) => {
            ic_cdk::println!("Balance reconciliation failed: {}", e);
            crate::audit::append(
                ic_cdk::api::time(),
                crate::types::AuditEvent::SystemError {
                    error: format!("Balance reconciliation failed: {}", e),
                },
            );
            get().value
        }
    }
}

/// Start the periodic reconciliation timer plus one eager refresh.
/// Call from init and post_upgrade; repeated calls are no-ops.
pub fn start_reconciliation_timer() {
    RECONCILE_TIMER_ID.with(|id| {
        if id.borrow().is_some() {
            return;
        }
        let timer_id = ic_cdk_timers::set_timer_interval(RECONCILE_INTERVAL, || {
            ic_cdk::spawn(async {
                reconcile().await;
            });
        });
        *id.borrow_mut() = Some(timer_id);
    });

    // Eager refresh so the cache is never empty after a restart
    ic_cdk_timers::set_timer(Duration::ZERO, || {
        ic_cdk::spawn(async {
            let balance = reconcile().await;
            ic_cdk::println!("Balance cache initialized: {}", balance);
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credit_and_debit_track_confirmed_transfers() {
        overwrite(1_000, 5);
        credit(500);
        debit(200);
        let cache = get();
        assert_eq!(cache.value, 1_300);
        assert_eq!(cache.last_reconciled_at, 5);
    }

    #[test]
    fn debit_saturates_instead_of_underflowing() {
        overwrite(100, 0);
        debit(500);
        assert_eq!(get().value, 0);
    }

    #[test]
    fn small_payouts_skip_preflight() {
        overwrite(0, 0);
        assert!(preflight_large_payout(LARGE_PAYOUT_THRESHOLD - 1).is_ok());
    }

    #[test]
    fn large_payout_rejected_when_cache_insufficient() {
        overwrite(LARGE_PAYOUT_THRESHOLD / 2, 0);
        let err = preflight_large_payout(LARGE_PAYOUT_THRESHOLD).unwrap_err();
        assert!(matches!(err, PoolError::Validation { .. }));

        overwrite(LARGE_PAYOUT_THRESHOLD * 2, 0);
        assert!(preflight_large_payout(LARGE_PAYOUT_THRESHOLD).is_ok());
    }
}
