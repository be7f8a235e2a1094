//! Durable admin registry and admin-only diagnostics.
//!
//! The admin identity is a mutable stable cell seeded at install time, never a
//! compiled-in constant. Every privileged surface funnels through
//! `require_admin`, so transferring the role takes effect immediately.

use candid::{CandidType, Deserialize, Principal};
use ic_stable_structures::memory_manager::MemoryId;
use ic_stable_structures::storable::Bound;
use ic_stable_structures::{StableCell, Storable};
use std::borrow::Cow;
use std::cell::RefCell;

use crate::error::PoolError;
use crate::memory_ids::ADMIN_CONFIG_MEMORY_ID;
use crate::types::{AuditEvent, HealthCheck, LPPositionInfo, PendingWithdrawalInfo, UserBalance};
use crate::{accounting, audit, balance_cache, liquidity_pool, Memory};

const MAX_PAGINATION_LIMIT: u64 = 100;

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct AdminConfig {
    pub admin: Principal,
    pub fee_sink: Principal,
}

impl Default for AdminConfig {
    fn default() -> Self {
        // Anonymous means "not yet initialized": require_admin rejects
        // everyone until init() seeds the installer.
        Self {
            admin: Principal::anonymous(),
            fee_sink: Principal::anonymous(),
        }
    }
}

impl Storable for AdminConfig {
    fn to_bytes(&self) -> Cow<[u8]> {
        Cow::Owned(candid::encode_one(self).expect(
            "CRITICAL: Failed to encode AdminConfig. \
             This should never happen unless there's a bug in candid serialization.",
        ))
    }

    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        candid::decode_one(&bytes).expect(
            "CRITICAL: Failed to decode AdminConfig from stable storage. \
             This indicates storage corruption or an incompatible upgrade.",
        )
    }

    const BOUND: Bound = Bound::Unbounded;
}

thread_local! {
    static ADMIN_CONFIG: RefCell<StableCell<AdminConfig, Memory>> = RefCell::new(
        StableCell::init(
            crate::MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(ADMIN_CONFIG_MEMORY_ID))),
            AdminConfig::default()
        ).expect("Failed to init admin config cell")
    );
}

fn config() -> AdminConfig {
    ADMIN_CONFIG.with(|c| c.borrow().get().clone())
}

fn store(cfg: AdminConfig) {
    ADMIN_CONFIG.with(|c| {
        c.borrow_mut().set(cfg).expect("Failed to store admin config");
    });
}

/// Seed the registry at install time. Only overwrites an uninitialized cell,
/// so upgrades keep whatever admin was configured before.
pub fn init_admin(installer: Principal) {
    let cfg = config();
    if cfg.admin == Principal::anonymous() && installer != Principal::anonymous() {
        store(AdminConfig {
            admin: installer,
            fee_sink: installer,
        });
    }
}

pub fn get_admin() -> Principal {
    config().admin
}

pub fn get_fee_sink() -> Principal {
    config().fee_sink
}

pub fn require_admin(caller: Principal) -> Result<(), PoolError> {
    let admin = get_admin();
    if admin == Principal::anonymous() || caller != admin {
        return Err(PoolError::validation("Unauthorized: admin only"));
    }
    Ok(())
}

pub fn set_admin(caller: Principal, new_admin: Principal, now: u64) -> Result<(), PoolError> {
    require_admin(caller)?;
    if new_admin == Principal::anonymous() {
        return Err(PoolError::validation("Anonymous principal cannot be admin"));
    }

    let mut cfg = config();
    let old = cfg.admin;
    cfg.admin = new_admin;
    store(cfg);

    audit::append(now, AuditEvent::AdminChanged { old, new: new_admin });
    Ok(())
}

pub fn set_fee_sink(caller: Principal, new_sink: Principal, now: u64) -> Result<(), PoolError> {
    require_admin(caller)?;
    if new_sink == Principal::anonymous() {
        return Err(PoolError::validation("Anonymous principal cannot be fee sink"));
    }

    let mut cfg = config();
    let old = cfg.fee_sink;
    cfg.fee_sink = new_sink;
    store(cfg);

    audit::append(now, AuditEvent::FeeSinkChanged { old, new: new_sink });
    Ok(())
}

// =============================================================================
// DIAGNOSTICS
// =============================================================================

/// Consolidated financial + operational snapshot.
///
/// Refreshes the balance cache from ledger ground truth first, so the
/// reported deficit/surplus compares real money against tracked obligations.
pub async fn admin_health_check(caller: Principal) -> Result<HealthCheck, PoolError> {
    require_admin(caller)?;

    let ledger_balance = balance_cache::reconcile().await;
    let cached = balance_cache::get();

    let pool_reserve = liquidity_pool::get_pool_reserve();
    let total_deposits = accounting::calculate_total_deposits_internal();
    let calculated_total = pool_reserve
        .checked_add(total_deposits)
        .ok_or_else(|| PoolError::internal("Accounting overflow"))?;
    let excess = ledger_balance as i64 - calculated_total as i64;

    let (is_healthy, health_status) = if excess < 0 {
        (false, "CRITICAL: DEFICIT".to_string())
    } else if excess < 1_000_000 {
        (true, "HEALTHY".to_string())
    } else if excess < 5_000_000 {
        (true, "WARNING: Excess 1-5 USDT".to_string())
    } else {
        (false, "ACTION REQUIRED: Excess >5 USDT".to_string())
    };

    let (pending_count, pending_total) = accounting::get_pending_stats_internal();

    Ok(HealthCheck {
        pool_reserve,
        total_deposits,
        cached_balance: cached.value,
        ledger_balance,
        calculated_total,
        excess,
        is_healthy,
        health_status,
        timestamp: cached.last_reconciled_at,
        pending_withdrawals_count: pending_count,
        pending_withdrawals_total_amount: pending_total,
        unique_users: accounting::count_user_balances_internal(),
        unique_lps: liquidity_pool::count_lp_positions_internal(),
    })
}

/// Paginated audit journal, chronological order.
pub fn get_audit_log(
    caller: Principal,
    offset: u64,
    limit: u64,
) -> Result<Vec<crate::types::AuditEntry>, PoolError> {
    require_admin(caller)?;
    let limit = limit.min(MAX_PAGINATION_LIMIT);
    Ok(audit::read(offset, limit))
}

pub fn get_audit_log_count(caller: Principal) -> Result<u64, PoolError> {
    require_admin(caller)?;
    Ok(audit::len())
}

/// All pending withdrawals (for diagnosing stuck states)
pub fn get_all_pending_withdrawals(
    caller: Principal,
) -> Result<Vec<PendingWithdrawalInfo>, PoolError> {
    require_admin(caller)?;
    Ok(accounting::iter_pending_withdrawals_internal())
}

pub fn get_all_balances(
    caller: Principal,
    offset: u64,
    limit: u64,
) -> Result<Vec<UserBalance>, PoolError> {
    require_admin(caller)?;
    let limit = limit.min(MAX_PAGINATION_LIMIT);
    Ok(accounting::iter_user_balances_internal(offset as usize, limit as usize))
}

pub fn get_all_lp_positions(
    caller: Principal,
    offset: u64,
    limit: u64,
) -> Result<Vec<LPPositionInfo>, PoolError> {
    require_admin(caller)?;
    let limit = limit.min(MAX_PAGINATION_LIMIT);
    Ok(liquidity_pool::iter_lp_positions_internal(offset as usize, limit as usize))
}
