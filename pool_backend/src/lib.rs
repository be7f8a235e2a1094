//! Liquidity-pool accounting canister.
//!
//! Holds a shared ckUSDT reserve owned proportionally by LP share holders,
//! plus per-user betting balances that games settle against the reserve.
//! All fund movements run through a durable pending-withdrawal state machine
//! so an unconfirmed ledger call can never pay out twice or silently lose
//! a user's claim.

use candid::{Nat, Principal};
use ic_stable_structures::memory_manager::{MemoryManager, VirtualMemory};
use ic_stable_structures::DefaultMemoryImpl;
use std::cell::RefCell;

pub mod accounting;
pub mod admin;
pub mod audit;
pub mod balance_cache;
pub mod error;
pub mod guard;
pub mod ledger;
pub mod liquidity_pool;
pub mod memory_ids;
pub mod nat_helpers;
pub mod types;

#[cfg(test)]
mod tests;

use error::PoolError;
use liquidity_pool::{LPPosition, PoolStats};
use types::{
    AuditEntry, HealthCheck, LPPositionInfo, PendingWithdrawal, PendingWithdrawalInfo,
    UserBalance, WithdrawRequest,
};

pub type Memory = VirtualMemory<DefaultMemoryImpl>;

thread_local! {
    pub static MEMORY_MANAGER: RefCell<MemoryManager<DefaultMemoryImpl>> =
        RefCell::new(MemoryManager::init(DefaultMemoryImpl::default()));
}

// =============================================================================
// LIFECYCLE
// =============================================================================

#[ic_cdk::init]
fn init() {
    admin::init_admin(ic_cdk::caller());
    balance_cache::start_reconciliation_timer();
    ic_cdk::println!("Pool canister initialized");
}

#[ic_cdk::post_upgrade]
fn post_upgrade() {
    // Timers do not survive upgrades
    balance_cache::start_reconciliation_timer();
    ic_cdk::println!("Pool canister upgraded");
}

// =============================================================================
// BALANCE & DEPOSIT ENDPOINTS
// =============================================================================

/// Deposit ckUSDT into the caller's betting balance (requires ICRC-2
/// approval first). Returns the new balance.
#[ic_cdk::update]
async fn deposit_balance(amount: u64) -> Result<u64, PoolError> {
    accounting::deposit_balance(ic_cdk::caller(), amount).await
}

#[ic_cdk::query]
fn get_balance(user: Principal) -> u64 {
    accounting::get_balance(user)
}

#[ic_cdk::query]
fn get_my_balance() -> u64 {
    accounting::get_balance(ic_cdk::caller())
}

// =============================================================================
// LIQUIDITY ENDPOINTS
// =============================================================================

/// Deposit into the pool and mint LP shares. `min_shares_expected` is the
/// caller's slippage bound; if minting would fall below it the funds land in
/// the betting balance instead.
#[ic_cdk::update]
async fn deposit(amount: u64, min_shares_expected: Option<Nat>) -> Result<Nat, PoolError> {
    liquidity_pool::deposit_liquidity(ic_cdk::caller(), amount, min_shares_expected).await
}

/// Withdraw either a fixed amount from the betting balance or a number of
/// LP shares for a proportional payout. Returns the amount sent.
#[ic_cdk::update]
async fn withdraw(request: WithdrawRequest) -> Result<u64, PoolError> {
    let caller = ic_cdk::caller();
    match request {
        WithdrawRequest::Amount(amount) => accounting::withdraw_amount(caller, amount).await,
        WithdrawRequest::Shares(shares) => {
            liquidity_pool::withdraw_liquidity(caller, shares).await
        }
    }
}

/// Re-attempt a stuck withdrawal with its original idempotency key.
#[ic_cdk::update]
async fn retry_withdrawal() -> Result<u64, PoolError> {
    accounting::retry_withdrawal(ic_cdk::caller()).await
}

/// Give up a stuck withdrawal. Does NOT restore the debited funds: the
/// original transfer may have landed.
#[ic_cdk::update]
fn abandon_withdrawal() -> Result<u64, PoolError> {
    accounting::abandon_withdrawal(ic_cdk::caller(), ic_cdk::api::time())
}

#[ic_cdk::query]
fn withdrawal_status() -> Option<PendingWithdrawal> {
    accounting::withdrawal_status(ic_cdk::caller())
}

#[ic_cdk::query]
fn get_pool_stats() -> PoolStats {
    liquidity_pool::get_pool_stats_internal()
}

#[ic_cdk::query]
fn get_lp_position(user: Principal) -> LPPosition {
    liquidity_pool::get_lp_position_internal(user)
}

#[ic_cdk::query]
fn get_my_lp_position() -> LPPosition {
    liquidity_pool::get_lp_position_internal(ic_cdk::caller())
}

#[ic_cdk::query]
fn calculate_shares_preview(amount: u64) -> Result<Nat, PoolError> {
    liquidity_pool::calculate_shares_preview(amount)
}

/// Whether the reserve is large enough for games to settle against.
#[ic_cdk::query]
fn can_accept_bets() -> bool {
    liquidity_pool::can_accept_bets()
}

// =============================================================================
// ADMIN ENDPOINTS
// =============================================================================

#[ic_cdk::query]
fn get_admin() -> Principal {
    admin::get_admin()
}

#[ic_cdk::update]
fn set_admin(new_admin: Principal) -> Result<(), PoolError> {
    admin::set_admin(ic_cdk::caller(), new_admin, ic_cdk::api::time())
}

#[ic_cdk::query]
fn get_fee_sink() -> Principal {
    admin::get_fee_sink()
}

#[ic_cdk::update]
fn set_fee_sink(new_sink: Principal) -> Result<(), PoolError> {
    admin::set_fee_sink(ic_cdk::caller(), new_sink, ic_cdk::api::time())
}

#[ic_cdk::update]
async fn admin_health_check() -> Result<HealthCheck, PoolError> {
    admin::admin_health_check(ic_cdk::caller()).await
}

#[ic_cdk::query]
fn get_audit_log(offset: u64, limit: u64) -> Result<Vec<AuditEntry>, PoolError> {
    admin::get_audit_log(ic_cdk::caller(), offset, limit)
}

#[ic_cdk::query]
fn get_audit_log_count() -> Result<u64, PoolError> {
    admin::get_audit_log_count(ic_cdk::caller())
}

#[ic_cdk::query]
fn get_all_pending_withdrawals() -> Result<Vec<PendingWithdrawalInfo>, PoolError> {
    admin::get_all_pending_withdrawals(ic_cdk::caller())
}

#[ic_cdk::query]
fn get_all_balances(offset: u64, limit: u64) -> Result<Vec<UserBalance>, PoolError> {
    admin::get_all_balances(ic_cdk::caller(), offset, limit)
}

#[ic_cdk::query]
fn get_all_lp_positions(offset: u64, limit: u64) -> Result<Vec<LPPositionInfo>, PoolError> {
    admin::get_all_lp_positions(ic_cdk::caller(), offset, limit)
}

/// Force a balance cache refresh from ledger ground truth.
#[ic_cdk::update]
async fn refresh_canister_balance() -> Result<u64, PoolError> {
    admin::require_admin(ic_cdk::caller())?;
    Ok(balance_cache::reconcile().await)
}

/// Emergency escape hatch for a guard slot that never released.
#[ic_cdk::update]
fn admin_clear_guard(principal: Principal) -> Result<bool, PoolError> {
    admin::require_admin(ic_cdk::caller())?;
    Ok(guard::clear_guard_for_principal(principal))
}

#[ic_cdk::query]
fn has_active_guard(principal: Principal) -> bool {
    guard::has_active_guard(principal)
}

/// O(n) consistency probe: share ledger sum vs recorded supply.
#[ic_cdk::query]
fn verify_share_ledger() -> Result<bool, PoolError> {
    admin::require_admin(ic_cdk::caller())?;
    Ok(liquidity_pool::share_ledger_is_consistent())
}

ic_cdk::export_candid!();
