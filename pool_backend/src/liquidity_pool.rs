//! Share-based liquidity pool.
//!
//! LPs deposit into a common reserve and receive proportional shares. Game
//! settlements move the reserve without touching the share supply - that is
//! the mechanism by which the share price floats. All share math is exact
//! integer arithmetic; division truncates toward zero, which always rounds
//! in the pool's favor.

use candid::{CandidType, Deserialize, Nat, Principal};
use ic_stable_structures::memory_manager::MemoryId;
use ic_stable_structures::storable::Bound;
use ic_stable_structures::{StableBTreeMap, StableCell, Storable};
use serde::Serialize;
use std::borrow::Cow;
use std::cell::RefCell;

use crate::error::PoolError;
use crate::guard::OperationGuard;
use crate::memory_ids::{LP_SHARES_MEMORY_ID, POOL_STATE_MEMORY_ID};
use crate::nat_helpers::{
    nat_add, nat_divide, nat_is_zero, nat_multiply, nat_subtract, nat_to_u64, nat_zero,
    u64_to_nat, StorableNat,
};
use crate::types::{AuditEvent, LPPositionInfo, DECIMALS_PER_CKUSDT};
use crate::{accounting, audit, balance_cache, ledger, Memory};

// Constants

/// 1 USDT minimum for subsequent LP deposits.
pub const MIN_DEPOSIT: u64 = 1_000_000;
/// 0.1 USDT minimum payout.
pub const MIN_WITHDRAWAL: u64 = 100_000;
/// The very first deposit into an empty pool must be at least 100 USDT.
/// A dust-sized seed would let an attacker manipulate the share price
/// before a victim's larger deposit lands.
pub const FIRST_DEPOSIT_FLOOR: u64 = 100_000_000;
/// 100 USDT pool reserve required before games may settle against it.
pub const MIN_OPERATING_BALANCE: u64 = 100_000_000;
/// 1% withdrawal fee, skimmed to the fee sink (best effort).
pub const LP_WITHDRAWAL_FEE_BPS: u64 = 100;

// Pool state for stable storage
#[derive(Clone, CandidType, Deserialize, Serialize)]
pub struct PoolState {
    pub reserve: Nat,
    pub total_shares: Nat,
}

impl Storable for PoolState {
    fn to_bytes(&self) -> Cow<[u8]> {
        let serialized = serde_json::to_vec(self).expect("Failed to serialize PoolState");
        Cow::Owned(serialized)
    }

    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        serde_json::from_slice(&bytes).expect("Failed to deserialize PoolState")
    }

    const BOUND: Bound = Bound::Bounded {
        max_size: 1000,
        is_fixed_size: false,
    };
}

// Storage
thread_local! {
    // LP shares by user. The sum of this map must equal
    // POOL_STATE.total_shares at every quiescent point.
    static LP_SHARES: RefCell<StableBTreeMap<Principal, StorableNat, Memory>> = RefCell::new(
        StableBTreeMap::init(
            crate::MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(LP_SHARES_MEMORY_ID)))
        )
    );

    static POOL_STATE: RefCell<StableCell<PoolState, Memory>> = RefCell::new(
        StableCell::init(
            crate::MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(POOL_STATE_MEMORY_ID))),
            PoolState {
                reserve: Nat::from(0u64),
                total_shares: Nat::from(0u64),
            }
        ).expect("Failed to init pool state cell")
    );
}

// Types
#[derive(CandidType, Serialize, Deserialize, Clone, Debug)]
pub struct LPPosition {
    pub shares: Nat,
    pub pool_ownership_percent: f64,
    pub redeemable_amount: Nat,
}

#[derive(CandidType, Serialize, Deserialize, Clone, Debug)]
pub struct PoolStats {
    pub total_shares: Nat,
    pub pool_reserve: Nat,
    pub share_price: Nat,
    pub total_liquidity_providers: u64,
}

// =============================================================================
// SHARE MATH (pure)
// =============================================================================

/// Shares minted for a deposit against the given pool state.
///
/// Empty pool: additive minting (1 share per smallest unit), gated by the
/// first-deposit floor. Otherwise proportional minting with truncation, so
/// `minted * reserve <= amount * total_shares` always holds.
pub fn shares_for_deposit(
    amount: &Nat,
    reserve: &Nat,
    total_shares: &Nat,
) -> Result<Nat, PoolError> {
    if nat_is_zero(total_shares) {
        if amount < &u64_to_nat(FIRST_DEPOSIT_FLOOR) {
            return Err(PoolError::validation(format!(
                "First deposit into an empty pool must be at least {} USDT",
                FIRST_DEPOSIT_FLOOR / DECIMALS_PER_CKUSDT
            )));
        }
        // Zero-reserve case is special-cased to additive minting, so the
        // division below can never see a zero denominator.
        return Ok(amount.clone());
    }

    if nat_is_zero(reserve) {
        // Shares exist but the reserve was fully drained by game losses.
        // There is no meaningful price to mint at.
        return Err(PoolError::validation(
            "Pool reserve is zero; deposits are suspended until existing shares are redeemed",
        ));
    }

    let numerator = nat_multiply(amount, total_shares);
    nat_divide(&numerator, reserve).ok_or_else(|| PoolError::internal("Division by zero"))
}

/// Payout for burning `shares` against the given pool state.
/// Truncation favors the pool: `payout * total_shares <= shares * reserve`.
pub fn payout_for_shares(
    shares: &Nat,
    reserve: &Nat,
    total_shares: &Nat,
) -> Result<Nat, PoolError> {
    if nat_is_zero(total_shares) {
        return Err(PoolError::validation("No shares in circulation"));
    }
    if nat_is_zero(reserve) {
        return Err(PoolError::validation("Pool reserve is empty"));
    }

    let numerator = nat_multiply(shares, reserve);
    nat_divide(&numerator, total_shares).ok_or_else(|| PoolError::internal("Division by zero"))
}

// =============================================================================
// STATE ACCESS
// =============================================================================

pub fn get_pool_state() -> PoolState {
    POOL_STATE.with(|s| s.borrow().get().clone())
}

fn set_pool_state(state: PoolState) {
    POOL_STATE.with(|s| {
        s.borrow_mut().set(state).expect("Failed to store pool state");
    });
}

pub fn get_pool_reserve() -> u64 {
    nat_to_u64(&get_pool_state().reserve).expect("Pool reserve exceeds u64")
}

pub fn get_user_shares(user: Principal) -> Nat {
    LP_SHARES.with(|s| {
        s.borrow()
            .get(&user)
            .map(|sn| sn.0.clone())
            .unwrap_or_else(nat_zero)
    })
}

// =============================================================================
// DEPOSIT (mints shares)
// =============================================================================

/// Projected shares for `amount` against current state (no side effects).
pub fn calculate_shares_preview(amount: u64) -> Result<Nat, PoolError> {
    let state = get_pool_state();
    shares_for_deposit(&u64_to_nat(amount), &state.reserve, &state.total_shares)
}

/// LP deposit: pull funds via ICRC-2, then mint shares at the post-transfer
/// pool state.
///
/// The share count is computed twice: once pre-flight (so a deposit that
/// would mint zero shares is rejected before any funds move) and once after
/// the transfer, because other operations may interleave during the await.
/// If the post-transfer count violates `min_shares_expected`, the funds are
/// refunded to the caller's betting balance rather than minted.
pub async fn deposit_liquidity(
    caller: Principal,
    amount: u64,
    min_shares_expected: Option<Nat>,
) -> Result<Nat, PoolError> {
    let _guard = OperationGuard::for_principal(caller)?;

    if caller == Principal::anonymous() {
        return Err(PoolError::validation("Anonymous principal cannot deposit"));
    }
    if amount < MIN_DEPOSIT {
        return Err(PoolError::validation(format!(
            "Minimum LP deposit is {} USDT",
            MIN_DEPOSIT / DECIMALS_PER_CKUSDT
        )));
    }
    if let Some(min_shares) = &min_shares_expected {
        if nat_is_zero(min_shares) {
            return Err(PoolError::validation("min_shares_expected must be > 0"));
        }
    }

    // A pending withdrawal would make a slippage refund fail, orphaning the
    // deposit inside the canister.
    if accounting::withdrawal_status(caller).is_some() {
        return Err(PoolError::validation(
            "Cannot deposit while a withdrawal is pending. \
             Complete or abandon the pending withdrawal first.",
        ));
    }

    // Pre-flight: reject dust deposits and enforce the first-deposit floor
    // before any funds move.
    let projected = calculate_shares_preview(amount)?;
    if nat_is_zero(&projected) {
        return Err(PoolError::validation("Deposit too small: results in 0 shares"));
    }

    // Interaction: pull funds from the user (suspension point).
    ledger::pull_from(caller, amount).await?;
    balance_cache::credit(amount);

    let now = ic_cdk::api::time();
    mint_shares_after_transfer(caller, amount, min_shares_expected, now)
}

/// Post-transfer half of the deposit: recompute shares against current state,
/// enforce slippage, and commit. Funds have already arrived, so every failure
/// path here must refund to the caller's betting balance.
pub(crate) fn mint_shares_after_transfer(
    caller: Principal,
    amount: u64,
    min_shares_expected: Option<Nat>,
    now: u64,
) -> Result<Nat, PoolError> {
    let state = get_pool_state();
    let shares_to_mint =
        match shares_for_deposit(&u64_to_nat(amount), &state.reserve, &state.total_shares) {
            Ok(shares) if !nat_is_zero(&shares) => shares,
            // Pool conditions changed during the transfer (e.g. the floor
            // now applies, or minting would truncate to zero).
            _ => {
                accounting::credit_balance(caller, amount);
                return Err(PoolError::validation(format!(
                    "Pool conditions changed during transfer; {} has been credited \
                     to your betting balance",
                    amount
                )));
            }
        };

    if let Some(min_shares) = min_shares_expected {
        if shares_to_mint < min_shares {
            audit::append(
                now,
                AuditEvent::SlippageProtectionTriggered {
                    user: caller,
                    deposit_amount: amount,
                    expected_min_shares: min_shares.clone(),
                    actual_shares: shares_to_mint.clone(),
                },
            );
            // Refund to betting balance (safe - withdrawable normally)
            accounting::credit_balance(caller, amount);
            return Err(PoolError::validation(format!(
                "Slippage exceeded: expected min {} shares but would receive {}. \
                 Your {} has been credited to your betting balance. \
                 Call calculate_shares_preview and retry with an adjusted minimum.",
                min_shares, shares_to_mint, amount
            )));
        }
    }

    LP_SHARES.with(|shares| {
        let mut shares_map = shares.borrow_mut();
        let current = shares_map
            .get(&caller)
            .map(|s| s.0.clone())
            .unwrap_or_else(nat_zero);
        shares_map.insert(caller, StorableNat(nat_add(&current, &shares_to_mint)));
    });

    let mut state = get_pool_state();
    state.reserve = nat_add(&state.reserve, &u64_to_nat(amount));
    state.total_shares = nat_add(&state.total_shares, &shares_to_mint);
    set_pool_state(state);

    audit::append(
        now,
        AuditEvent::LiquidityAdded {
            user: caller,
            amount,
            shares: shares_to_mint.clone(),
        },
    );

    Ok(shares_to_mint)
}

// =============================================================================
// WITHDRAW (burns shares)
// =============================================================================

/// Burn `shares_to_burn` for a proportional payout.
///
/// Checks-Effects-Interactions: shares, supply and reserve are debited and
/// the pending record created in one local transition, then the external
/// transfer runs. The caller's leg goes first; the 1% fee leg is best-effort
/// and can never roll back or block the payout.
pub async fn withdraw_liquidity(caller: Principal, shares_to_burn: Nat) -> Result<u64, PoolError> {
    let _guard = OperationGuard::for_principal(caller)?;

    if caller == Principal::anonymous() {
        return Err(PoolError::validation("Anonymous principal cannot withdraw"));
    }

    let now = ic_cdk::api::time();
    initiate_lp_withdrawal(caller, shares_to_burn, now)?;

    let outcome = accounting::execute_pending_transfer(caller).await;
    let completed = accounting::apply_transfer_outcome(caller, outcome, now)?;

    accounting::settle_fee_leg(completed.fee, now).await;

    Ok(completed.amount)
}

/// Effects phase of an LP withdrawal: validate, compute the payout, debit
/// everything, and record the pending withdrawal. No external interaction.
pub(crate) fn initiate_lp_withdrawal(
    caller: Principal,
    shares_to_burn: Nat,
    now: u64,
) -> Result<(), PoolError> {
    if nat_is_zero(&shares_to_burn) {
        return Err(PoolError::validation("Cannot withdraw zero shares"));
    }

    let user_shares = get_user_shares(caller);
    if user_shares < shares_to_burn {
        return Err(PoolError::validation("Insufficient shares"));
    }

    let state = get_pool_state();
    if shares_to_burn > state.total_shares {
        // A ledger entry larger than the recorded supply means a prior bug
        // corrupted the books; do not proceed with these numbers.
        return Err(PoolError::internal("Share ledger exceeds recorded total supply"));
    }

    let payout_nat = payout_for_shares(&shares_to_burn, &state.reserve, &state.total_shares)?;
    let payout = nat_to_u64(&payout_nat)
        .ok_or_else(|| PoolError::internal("Payout exceeds u64"))?;

    if payout < MIN_WITHDRAWAL {
        return Err(PoolError::validation(format!(
            "Minimum withdrawal is {} (payout would be {})",
            MIN_WITHDRAWAL, payout
        )));
    }

    balance_cache::preflight_large_payout(payout)?;

    let fee = (payout * LP_WITHDRAWAL_FEE_BPS) / 10_000;
    let lp_amount = payout - fee;

    // Resolve every checked subtraction before the first mutation, so no
    // error path can leave a pending record or burned shares behind.
    let remaining_shares = nat_subtract(&user_shares, &shares_to_burn)
        .ok_or_else(|| PoolError::internal("Share balance underflow"))?;
    let new_reserve = nat_subtract(&state.reserve, &payout_nat)
        .ok_or_else(|| PoolError::internal("Reserve underflow"))?;
    let new_total_shares = nat_subtract(&state.total_shares, &shares_to_burn)
        .ok_or_else(|| PoolError::internal("Share supply underflow"))?;

    // Claim the pending slot (rejects duplicates)
    accounting::schedule_lp_withdrawal(
        caller,
        shares_to_burn.clone(),
        payout_nat.clone(),
        lp_amount,
        fee,
        now,
    )?;

    // Debit shares BEFORE the transfer (reentrancy protection)
    LP_SHARES.with(|shares| {
        let mut shares_map = shares.borrow_mut();
        if nat_is_zero(&remaining_shares) {
            shares_map.remove(&caller);
        } else {
            shares_map.insert(caller, StorableNat(remaining_shares));
        }
    });

    // Deduct the FULL payout (caller leg + fee) from reserve and supply
    set_pool_state(PoolState {
        reserve: new_reserve,
        total_shares: new_total_shares,
    });

    Ok(())
}

/// Restore an LP position after a definitely-failed withdrawal.
pub(crate) fn restore_lp_position(user: Principal, shares: Nat, reserve_debit: Nat) {
    LP_SHARES.with(|shares_map| {
        let mut map = shares_map.borrow_mut();
        let current = map.get(&user).map(|s| s.0.clone()).unwrap_or_else(nat_zero);
        map.insert(user, StorableNat(nat_add(&current, &shares)));
    });

    let mut state = get_pool_state();
    state.reserve = nat_add(&state.reserve, &reserve_debit);
    state.total_shares = nat_add(&state.total_shares, &shares);
    set_pool_state(state);
}

// =============================================================================
// GAME SETTLEMENT HOOKS
// =============================================================================

/// Player won: the profit leaves the reserve. Shares are untouched, so every
/// LP's claim shrinks proportionally.
pub(crate) fn update_pool_on_win(profit: u64) -> Result<(), PoolError> {
    let mut state = get_pool_state();
    state.reserve = nat_subtract(&state.reserve, &u64_to_nat(profit)).ok_or_else(|| {
        PoolError::validation(format!(
            "Payout {} exceeds pool reserve; settlement refused to protect LPs",
            profit
        ))
    })?;
    set_pool_state(state);
    Ok(())
}

/// Player lost: the stake joins the reserve.
pub(crate) fn update_pool_on_loss(stake: u64) {
    let mut state = get_pool_state();
    state.reserve = nat_add(&state.reserve, &u64_to_nat(stake));
    set_pool_state(state);
}

// =============================================================================
// QUERIES
// =============================================================================

pub fn get_lp_position_internal(user: Principal) -> LPPosition {
    let user_shares = get_user_shares(user);
    let state = get_pool_state();

    let (ownership_percent, redeemable) = if nat_is_zero(&state.total_shares) {
        (0.0, nat_zero())
    } else {
        let ownership = (nat_to_u64(&user_shares).unwrap_or(u64::MAX) as f64
            / nat_to_u64(&state.total_shares).unwrap_or(u64::MAX) as f64)
            * 100.0;
        let redeemable = if nat_is_zero(&state.reserve) {
            nat_zero()
        } else {
            payout_for_shares(&user_shares, &state.reserve, &state.total_shares)
                .unwrap_or_else(|_| nat_zero())
        };
        (ownership, redeemable)
    };

    LPPosition {
        shares: user_shares,
        pool_ownership_percent: ownership_percent,
        redeemable_amount: redeemable,
    }
}

pub fn get_pool_stats_internal() -> PoolStats {
    let state = get_pool_state();

    let share_price = if nat_is_zero(&state.total_shares) {
        u64_to_nat(DECIMALS_PER_CKUSDT) // 1.00 USDT initial price
    } else if nat_is_zero(&state.reserve) {
        u64_to_nat(1) // Minimum price if drained
    } else {
        nat_divide(&state.reserve, &state.total_shares).unwrap_or_else(nat_zero)
    };

    let total_lps = LP_SHARES.with(|shares| {
        shares
            .borrow()
            .iter()
            .filter(|(_, v)| !nat_is_zero(&v.0))
            .count() as u64
    });

    PoolStats {
        total_shares: state.total_shares,
        pool_reserve: state.reserve,
        share_price,
        total_liquidity_providers: total_lps,
    }
}

pub fn can_accept_bets() -> bool {
    get_pool_reserve() >= MIN_OPERATING_BALANCE
}

pub(crate) fn count_lp_positions_internal() -> u64 {
    LP_SHARES.with(|shares| shares.borrow().len())
}

pub(crate) fn iter_lp_positions_internal(offset: usize, limit: usize) -> Vec<LPPositionInfo> {
    LP_SHARES.with(|shares| {
        shares
            .borrow()
            .iter()
            .skip(offset)
            .take(limit)
            .map(|(user, shares)| LPPositionInfo {
                user,
                shares: shares.0.clone(),
            })
            .collect()
    })
}

/// Defensive consistency check: the share ledger must sum to the recorded
/// supply. O(n) over LP entries, so only diagnostic surfaces call it.
pub(crate) fn share_ledger_is_consistent() -> bool {
    let sum = LP_SHARES.with(|shares| {
        shares
            .borrow()
            .iter()
            .fold(nat_zero(), |acc, (_, v)| nat_add(&acc, &v.0))
    });
    sum == get_pool_state().total_shares
}
