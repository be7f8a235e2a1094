use candid::{CandidType, Deserialize, Nat, Principal};
use ic_stable_structures::storable::Bound;
use ic_stable_structures::Storable;
use serde::Serialize;
use std::borrow::Cow;

// =============================================================================
// CONSTANTS
// =============================================================================

pub const DECIMALS_PER_CKUSDT: u64 = 1_000_000; // 1 ckUSDT = 1,000,000 decimals (6 decimals)
pub const CKUSDT_CANISTER_ID: &str = "cngnf-vqaaa-aaaar-qag4q-cai";
pub const CKUSDT_TRANSFER_FEE: u64 = 10_000;

/// Cap on stored error strings so a malicious ledger response cannot bloat
/// stable memory.
pub fn sanitize_error(msg: &str) -> String {
    msg.chars().take(256).collect()
}

// =============================================================================
// WITHDRAWAL TYPES
// =============================================================================

/// What the caller wants to withdraw: a fixed amount from their betting
/// balance, or a number of LP shares burned for a proportional payout.
#[derive(CandidType, Deserialize, Serialize, Clone, Debug)]
pub enum WithdrawRequest {
    Amount(u64),
    Shares(Nat),
}

/// Pending withdrawal awaiting confirmation or user action.
///
/// # Design Note
/// The system does not auto-retry or auto-rollback transactions.
/// Users must manually call `retry_withdrawal()` or `abandon_withdrawal()`.
/// This prevents double-spend vulnerabilities from uncertain transfer outcomes.
#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct PendingWithdrawal {
    pub kind: WithdrawalKind,
    pub created_at: u64, // Ledger idempotency key (used for deduplication)
    pub last_error: Option<String>,
}

#[derive(CandidType, Deserialize, Clone, Debug)]
pub enum WithdrawalKind {
    /// Withdrawal of a fixed amount from the caller's betting balance.
    User { amount: u64 },
    /// LP share redemption. `shares` and `reserve_debit` record exactly what
    /// was debited so a definite failure can restore the position; `amount`
    /// is the caller's leg, `fee` the best-effort fee-sink leg.
    Lp {
        shares: Nat,
        reserve_debit: Nat,
        amount: u64,
        fee: u64,
    },
}

impl PendingWithdrawal {
    /// Amount owed to the caller regardless of withdrawal kind.
    pub fn payable_amount(&self) -> u64 {
        match &self.kind {
            WithdrawalKind::User { amount } => *amount,
            WithdrawalKind::Lp { amount, .. } => *amount,
        }
    }
}

impl Storable for PendingWithdrawal {
    fn to_bytes(&self) -> Cow<[u8]> {
        Cow::Owned(candid::encode_one(self).expect(
            "CRITICAL: Failed to encode PendingWithdrawal. \
             This should never happen unless there's a bug in candid serialization. \
             If this occurs, it indicates a serious system integrity issue.",
        ))
    }

    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        candid::decode_one(&bytes).expect(
            "CRITICAL: Failed to decode PendingWithdrawal from stable storage. \
             This indicates storage corruption or an incompatible canister upgrade. \
             Manual intervention required - check upgrade path and stable storage state.",
        )
    }

    const BOUND: Bound = Bound::Unbounded;
}

// =============================================================================
// AUDIT TYPES
// =============================================================================

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct AuditEntry {
    pub timestamp: u64,
    pub event: AuditEvent,
}

#[derive(CandidType, Deserialize, Clone, Debug)]
pub enum AuditEvent {
    DepositCompleted { user: Principal, amount: u64, new_balance: u64 },
    LiquidityAdded { user: Principal, amount: u64, shares: Nat },
    WithdrawalInitiated { user: Principal, amount: u64 },
    WithdrawalCompleted { user: Principal, amount: u64 },
    WithdrawalFailed { user: Principal, amount: u64 },
    /// User voluntarily abandoned a stuck withdrawal.
    /// CRITICAL: This does NOT restore balance - funds may be orphaned.
    /// This is intentional to prevent double-spend.
    WithdrawalAbandoned { user: Principal, amount: u64 },
    BalanceRestored { user: Principal, amount: u64 },
    LpRestored { user: Principal, amount: u64 },
    FeeTransferFailed { amount: u64, reason: String },
    SlippageProtectionTriggered {
        user: Principal,
        deposit_amount: u64,
        expected_min_shares: Nat,
        actual_shares: Nat,
    },
    AdminChanged { old: Principal, new: Principal },
    FeeSinkChanged { old: Principal, new: Principal },
    SystemError { error: String },
}

impl Storable for AuditEntry {
    fn to_bytes(&self) -> Cow<[u8]> {
        Cow::Owned(candid::encode_one(self).expect(
            "CRITICAL: Failed to encode AuditEntry. \
             This should never happen unless there's a bug in candid serialization. \
             Audit logging is failing - system integrity may be compromised.",
        ))
    }

    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        candid::decode_one(&bytes).expect(
            "CRITICAL: Failed to decode AuditEntry from stable storage. \
             This indicates audit log corruption or an incompatible upgrade. \
             Audit trail integrity cannot be guaranteed.",
        )
    }

    const BOUND: Bound = Bound::Unbounded;
}

// =============================================================================
// ADMIN / DIAGNOSTIC TYPES
// =============================================================================

/// Health check result for admin monitoring.
#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct HealthCheck {
    pub pool_reserve: u64,
    pub total_deposits: u64,
    pub cached_balance: u64,
    pub ledger_balance: u64,
    pub calculated_total: u64,
    pub excess: i64,
    pub is_healthy: bool,
    pub health_status: String,
    pub timestamp: u64,
    pub pending_withdrawals_count: u64,
    pub pending_withdrawals_total_amount: u64,
    pub unique_users: u64,
    pub unique_lps: u64,
}

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct PendingWithdrawalInfo {
    pub user: Principal,
    pub kind: String,
    pub amount: u64,
    pub created_at: u64,
}

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct UserBalance {
    pub user: Principal,
    pub balance: u64,
}

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct LPPositionInfo {
    pub user: Principal,
    pub shares: Nat,
}

// =============================================================================
// ICRC-1 / ICRC-2 LEDGER TYPES
// =============================================================================

#[derive(CandidType, Deserialize, Serialize, Clone, Debug)]
pub struct Account {
    pub owner: Principal,
    pub subaccount: Option<[u8; 32]>,
}

impl From<Principal> for Account {
    fn from(owner: Principal) -> Self {
        Self {
            owner,
            subaccount: None,
        }
    }
}

#[derive(CandidType, Deserialize, Serialize, Clone, Debug)]
pub struct TransferArg {
    pub from_subaccount: Option<[u8; 32]>,
    pub to: Account,
    pub amount: Nat,
    pub fee: Option<Nat>,
    pub memo: Option<Vec<u8>>,
    pub created_at_time: Option<u64>,
}

#[derive(CandidType, Deserialize, Serialize, Clone, Debug)]
pub enum TransferError {
    BadFee { expected_fee: Nat },
    BadBurn { min_burn_amount: Nat },
    InsufficientFunds { balance: Nat },
    TooOld,
    CreatedInFuture { ledger_time: u64 },
    Duplicate { duplicate_of: Nat },
    TemporarilyUnavailable,
    GenericError { error_code: Nat, message: String },
}

#[derive(CandidType, Deserialize, Serialize, Clone, Debug)]
pub struct TransferFromArgs {
    pub spender_subaccount: Option<[u8; 32]>,
    pub from: Account,
    pub to: Account,
    pub amount: Nat,
    pub fee: Option<Nat>,
    pub memo: Option<Vec<u8>>,
    pub created_at_time: Option<u64>,
}

#[derive(CandidType, Deserialize, Serialize, Clone, Debug)]
pub enum TransferFromError {
    BadFee { expected_fee: Nat },
    BadBurn { min_burn_amount: Nat },
    InsufficientFunds { balance: Nat },
    InsufficientAllowance { allowance: Nat },
    TooOld,
    CreatedInFuture { ledger_time: u64 },
    Duplicate { duplicate_of: Nat },
    TemporarilyUnavailable,
    GenericError { error_code: Nat, message: String },
}
