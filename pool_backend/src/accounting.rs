//! Internal fund accounting: betting balances, the pending-withdrawal state
//! machine, and game settlement against the pool.
//!
//! Withdrawals follow Checks-Effects-Interactions strictly. Local state is
//! debited and a durable pending record written BEFORE the ledger call, so a
//! reply that never arrives leaves the books conservative: the user is owed
//! at most what the pending record says, never more than once.

use candid::Principal;
use ic_stable_structures::memory_manager::MemoryId;
use ic_stable_structures::StableBTreeMap;
use std::cell::RefCell;

use crate::error::PoolError;
use crate::guard::OperationGuard;
use crate::ledger::{self, TransferOutcome};
use crate::memory_ids::{PENDING_WITHDRAWALS_MEMORY_ID, USER_BALANCES_MEMORY_ID};
use crate::types::{
    AuditEvent, PendingWithdrawal, PendingWithdrawalInfo, UserBalance, WithdrawalKind,
    DECIMALS_PER_CKUSDT,
};
use crate::{admin, audit, balance_cache, liquidity_pool, Memory};

/// 1 USDT minimum betting deposit.
pub const MIN_USER_DEPOSIT: u64 = 1_000_000;
/// 0.1 USDT minimum withdrawal from a betting balance.
pub const MIN_WITHDRAWAL: u64 = 100_000;

thread_local! {
    static USER_BALANCES: RefCell<StableBTreeMap<Principal, u64, Memory>> = RefCell::new(
        StableBTreeMap::init(
            crate::MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(USER_BALANCES_MEMORY_ID)))
        )
    );

    // At most one pending withdrawal per principal. The record is the single
    // source of truth for what a retry must re-send.
    static PENDING_WITHDRAWALS: RefCell<StableBTreeMap<Principal, PendingWithdrawal, Memory>> =
        RefCell::new(
            StableBTreeMap::init(
                crate::MEMORY_MANAGER
                    .with(|m| m.borrow().get(MemoryId::new(PENDING_WITHDRAWALS_MEMORY_ID)))
            )
        );
}

/// Outcome of a completed withdrawal: the caller's leg plus any fee leg
/// still owed to the fee sink.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompletedWithdrawal {
    pub amount: u64,
    pub fee: u64,
}

// =============================================================================
// BALANCES
// =============================================================================

pub fn get_balance(user: Principal) -> u64 {
    USER_BALANCES.with(|b| b.borrow().get(&user).unwrap_or(0))
}

/// Unconditional credit. Used by deposits, rollbacks and slippage refunds;
/// all paths that reach it have already confirmed the inbound funds.
pub(crate) fn credit_balance(user: Principal, amount: u64) {
    USER_BALANCES.with(|b| {
        let mut balances = b.borrow_mut();
        let current = balances.get(&user).unwrap_or(0);
        balances.insert(user, current.saturating_add(amount));
    });
}

fn debit_balance(user: Principal, amount: u64) -> Result<(), PoolError> {
    USER_BALANCES.with(|b| {
        let mut balances = b.borrow_mut();
        let current = balances.get(&user).unwrap_or(0);
        let remaining = current
            .checked_sub(amount)
            .ok_or_else(|| PoolError::validation("Insufficient balance"))?;
        if remaining == 0 {
            balances.remove(&user);
        } else {
            balances.insert(user, remaining);
        }
        Ok(())
    })
}

// =============================================================================
// DEPOSIT (betting balance)
// =============================================================================

/// Pull funds from the caller via ICRC-2 and credit their betting balance.
pub async fn deposit_balance(caller: Principal, amount: u64) -> Result<u64, PoolError> {
    let _guard = OperationGuard::for_principal(caller)?;

    if caller == Principal::anonymous() {
        return Err(PoolError::validation("Anonymous principal cannot deposit"));
    }
    if amount < MIN_USER_DEPOSIT {
        return Err(PoolError::validation(format!(
            "Minimum deposit is {} USDT",
            MIN_USER_DEPOSIT / DECIMALS_PER_CKUSDT
        )));
    }

    ledger::pull_from(caller, amount).await?;
    balance_cache::credit(amount);

    credit_balance(caller, amount);
    let new_balance = get_balance(caller);
    audit::append(
        ic_cdk::api::time(),
        AuditEvent::DepositCompleted {
            user: caller,
            amount,
            new_balance,
        },
    );
    Ok(new_balance)
}

// =============================================================================
// WITHDRAWAL STATE MACHINE
// =============================================================================

pub fn withdrawal_status(user: Principal) -> Option<PendingWithdrawal> {
    PENDING_WITHDRAWALS.with(|p| p.borrow().get(&user))
}

/// Withdraw a fixed amount from the caller's betting balance.
pub async fn withdraw_amount(caller: Principal, amount: u64) -> Result<u64, PoolError> {
    let _guard = OperationGuard::for_principal(caller)?;

    if caller == Principal::anonymous() {
        return Err(PoolError::validation("Anonymous principal cannot withdraw"));
    }

    let now = ic_cdk::api::time();
    initiate_user_withdrawal(caller, amount, now)?;

    let outcome = execute_pending_transfer(caller).await;
    let completed = apply_transfer_outcome(caller, outcome, now)?;
    Ok(completed.amount)
}

/// Effects phase of a balance withdrawal: validate, debit, record pending.
pub(crate) fn initiate_user_withdrawal(
    caller: Principal,
    amount: u64,
    now: u64,
) -> Result<(), PoolError> {
    if withdrawal_status(caller).is_some() {
        return Err(PoolError::validation(
            "A withdrawal is already pending. \
             Call retry_withdrawal or abandon_withdrawal first.",
        ));
    }
    if amount < MIN_WITHDRAWAL {
        return Err(PoolError::validation(format!(
            "Minimum withdrawal is {}",
            MIN_WITHDRAWAL
        )));
    }
    balance_cache::preflight_large_payout(amount)?;

    // Debit BEFORE the transfer (reentrancy protection)
    debit_balance(caller, amount)?;

    PENDING_WITHDRAWALS.with(|p| {
        p.borrow_mut().insert(
            caller,
            PendingWithdrawal {
                kind: WithdrawalKind::User { amount },
                created_at: now,
                last_error: None,
            },
        )
    });

    audit::append(now, AuditEvent::WithdrawalInitiated { user: caller, amount });
    Ok(())
}

/// Record a pending LP withdrawal. The pool module debits shares and reserve
/// itself; this only claims the per-principal pending slot and journals it.
pub(crate) fn schedule_lp_withdrawal(
    caller: Principal,
    shares: candid::Nat,
    reserve_debit: candid::Nat,
    amount: u64,
    fee: u64,
    now: u64,
) -> Result<(), PoolError> {
    if withdrawal_status(caller).is_some() {
        return Err(PoolError::validation(
            "A withdrawal is already pending. \
             Call retry_withdrawal or abandon_withdrawal first.",
        ));
    }

    PENDING_WITHDRAWALS.with(|p| {
        p.borrow_mut().insert(
            caller,
            PendingWithdrawal {
                kind: WithdrawalKind::Lp {
                    shares,
                    reserve_debit,
                    amount,
                    fee,
                },
                created_at: now,
                last_error: None,
            },
        )
    });

    audit::append(now, AuditEvent::WithdrawalInitiated { user: caller, amount });
    Ok(())
}

/// Interaction phase: send the pending payout to its owner.
///
/// Always re-sends the amount and `created_at` recorded at initiation, so the
/// ledger can deduplicate a retry of a transfer that actually landed.
pub(crate) async fn execute_pending_transfer(user: Principal) -> TransferOutcome {
    let pending = match withdrawal_status(user) {
        Some(p) => p,
        None => {
            return TransferOutcome::DefiniteFailure("No pending withdrawal".to_string());
        }
    };
    ledger::transfer_to(user, pending.payable_amount(), Some(pending.created_at)).await
}

/// Resolve a transfer outcome against the pending record.
///
/// Success clears the record; definite failure rolls the debit back; an
/// uncertain outcome leaves the record in place untouched except for the
/// error note, because rolling back a transfer that may have landed would
/// let the user withdraw twice.
pub(crate) fn apply_transfer_outcome(
    user: Principal,
    outcome: TransferOutcome,
    now: u64,
) -> Result<CompletedWithdrawal, PoolError> {
    let pending = withdrawal_status(user)
        .ok_or_else(|| PoolError::internal("No pending withdrawal to resolve"))?;
    let amount = pending.payable_amount();

    match outcome {
        TransferOutcome::Success => {
            PENDING_WITHDRAWALS.with(|p| p.borrow_mut().remove(&user));
            balance_cache::debit(amount);
            audit::append(now, AuditEvent::WithdrawalCompleted { user, amount });

            let fee = match &pending.kind {
                WithdrawalKind::Lp { fee, .. } => *fee,
                WithdrawalKind::User { .. } => 0,
            };
            Ok(CompletedWithdrawal { amount, fee })
        }
        TransferOutcome::DefiniteFailure(reason) => {
            rollback_withdrawal(user, &pending, now);
            audit::append(now, AuditEvent::WithdrawalFailed { user, amount });
            Err(PoolError::transfer_failed(format!(
                "Withdrawal failed and was rolled back: {}",
                reason
            )))
        }
        TransferOutcome::Uncertain(reason) => {
            PENDING_WITHDRAWALS.with(|p| {
                p.borrow_mut().insert(
                    user,
                    PendingWithdrawal {
                        last_error: Some(reason.clone()),
                        ..pending
                    },
                )
            });
            Err(PoolError::transfer_uncertain(format!(
                "Transfer outcome unknown: {}. Funds are reserved in a pending \
                 withdrawal; call retry_withdrawal to try again or \
                 abandon_withdrawal to give up the claim.",
                reason
            )))
        }
    }
}

/// Undo the local debits of a withdrawal that definitely did not pay out.
fn rollback_withdrawal(user: Principal, pending: &PendingWithdrawal, now: u64) {
    PENDING_WITHDRAWALS.with(|p| p.borrow_mut().remove(&user));

    match &pending.kind {
        WithdrawalKind::User { amount } => {
            credit_balance(user, *amount);
            audit::append(now, AuditEvent::BalanceRestored { user, amount: *amount });
        }
        WithdrawalKind::Lp {
            shares,
            reserve_debit,
            amount,
            ..
        } => {
            liquidity_pool::restore_lp_position(user, shares.clone(), reserve_debit.clone());
            audit::append(now, AuditEvent::LpRestored { user, amount: *amount });
        }
    }
}

/// Re-attempt a pending withdrawal with its original amount and idempotency
/// key. Safe to call any number of times.
pub async fn retry_withdrawal(caller: Principal) -> Result<u64, PoolError> {
    let _guard = OperationGuard::for_principal(caller)?;

    if withdrawal_status(caller).is_none() {
        return Err(PoolError::validation("No pending withdrawal to retry"));
    }

    let now = ic_cdk::api::time();
    let outcome = execute_pending_transfer(caller).await;
    let completed = apply_transfer_outcome(caller, outcome, now)?;

    settle_fee_leg(completed.fee, now).await;

    Ok(completed.amount)
}

/// Give up the claim on a stuck withdrawal WITHOUT restoring the debit.
///
/// The transfer may have landed, so re-crediting here would be a double
/// spend. Returns the abandoned amount so the frontend can display what the
/// user walked away from.
pub fn abandon_withdrawal(caller: Principal, now: u64) -> Result<u64, PoolError> {
    let _guard = OperationGuard::for_principal(caller)?;

    let pending = withdrawal_status(caller)
        .ok_or_else(|| PoolError::validation("No pending withdrawal to abandon"))?;
    let amount = pending.payable_amount();

    PENDING_WITHDRAWALS.with(|p| p.borrow_mut().remove(&caller));
    audit::append(now, AuditEvent::WithdrawalAbandoned { user: caller, amount });

    Ok(amount)
}

/// Best-effort fee-sink leg of a completed LP withdrawal. Never blocks or
/// rolls back the caller's payout; a failure is journaled and the fee stays
/// in the canister until the next reconciliation absorbs it.
pub(crate) async fn settle_fee_leg(fee: u64, now: u64) {
    if fee == 0 {
        return;
    }
    let sink = admin::get_fee_sink();
    if sink == Principal::anonymous() {
        audit::append(
            now,
            AuditEvent::FeeTransferFailed {
                amount: fee,
                reason: "Fee sink not configured".to_string(),
            },
        );
        return;
    }

    match ledger::transfer_to(sink, fee, None).await {
        TransferOutcome::Success => balance_cache::debit(fee),
        TransferOutcome::DefiniteFailure(reason) | TransferOutcome::Uncertain(reason) => {
            audit::append(now, AuditEvent::FeeTransferFailed { amount: fee, reason });
        }
    }
}

// =============================================================================
// GAME SETTLEMENT
// =============================================================================

/// Apply one game result: the stake leaves the player's balance, the payout
/// (if any) enters it, and the difference settles against the pool reserve.
///
/// A player win that the reserve cannot cover is refused whole; no partial
/// settlement is ever applied.
pub fn settle_bet(user: Principal, bet: u64, payout: u64) -> Result<(), PoolError> {
    if bet == 0 {
        return Err(PoolError::validation("Bet must be greater than zero"));
    }
    if get_balance(user) < bet {
        return Err(PoolError::validation("Insufficient balance for bet"));
    }

    if payout > bet {
        // Pool pays the profit; this errors before any balance moves if the
        // reserve cannot cover it.
        liquidity_pool::update_pool_on_win(payout - bet)?;
    }

    debit_balance(user, bet)?;
    if payout > 0 {
        credit_balance(user, payout);
    }

    if payout < bet {
        liquidity_pool::update_pool_on_loss(bet - payout);
    }

    Ok(())
}

// =============================================================================
// DIAGNOSTIC INTERNALS
// =============================================================================

/// Sum of all betting balances (obligations to players).
pub(crate) fn calculate_total_deposits_internal() -> u64 {
    USER_BALANCES.with(|b| {
        b.borrow()
            .iter()
            .fold(0u64, |acc, (_, v)| acc.saturating_add(v))
    })
}

pub(crate) fn get_pending_stats_internal() -> (u64, u64) {
    PENDING_WITHDRAWALS.with(|p| {
        p.borrow().iter().fold((0u64, 0u64), |(count, total), (_, w)| {
            (count + 1, total.saturating_add(w.payable_amount()))
        })
    })
}

pub(crate) fn count_user_balances_internal() -> u64 {
    USER_BALANCES.with(|b| b.borrow().len())
}

pub(crate) fn iter_pending_withdrawals_internal() -> Vec<PendingWithdrawalInfo> {
    PENDING_WITHDRAWALS.with(|p| {
        p.borrow()
            .iter()
            .map(|(user, w)| PendingWithdrawalInfo {
                user,
                kind: match &w.kind {
                    WithdrawalKind::User { .. } => "user".to_string(),
                    WithdrawalKind::Lp { .. } => "lp".to_string(),
                },
                amount: w.payable_amount(),
                created_at: w.created_at,
            })
            .collect()
    })
}

pub(crate) fn iter_user_balances_internal(offset: usize, limit: usize) -> Vec<UserBalance> {
    USER_BALANCES.with(|b| {
        b.borrow()
            .iter()
            .skip(offset)
            .take(limit)
            .map(|(user, balance)| UserBalance { user, balance })
            .collect()
    })
}
