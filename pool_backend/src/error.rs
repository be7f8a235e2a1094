use candid::{CandidType, Deserialize};
use serde::Serialize;

/// Canister-wide error type.
///
/// Every error carries a machine-distinguishable kind plus a human-readable
/// reason. Callers can match on the variant to decide whether to retry
/// (`Concurrency`), consult the recovery endpoints (`TransferUncertain`),
/// or give up (`Validation`, `TransferFailed`).
#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub enum PoolError {
    /// Bad amount, insufficient balance/shares, or unauthorized caller.
    /// No state was mutated.
    Validation { reason: String },
    /// The caller already has an operation in flight. No state was mutated.
    Concurrency { reason: String },
    /// The external transfer definitely did not happen. Local state was
    /// rolled back; the caller's balance is restored.
    TransferFailed { reason: String },
    /// The external transfer outcome is unknown (timeout). Local debits are
    /// NOT rolled back; call `retry_withdrawal()` or `abandon_withdrawal()`.
    TransferUncertain { reason: String },
    /// A prior bug was detected defensively. The operation was halted.
    Internal { reason: String },
}

impl PoolError {
    pub fn validation(reason: impl Into<String>) -> Self {
        PoolError::Validation { reason: reason.into() }
    }

    pub fn concurrency(reason: impl Into<String>) -> Self {
        PoolError::Concurrency { reason: reason.into() }
    }

    pub fn transfer_failed(reason: impl Into<String>) -> Self {
        PoolError::TransferFailed { reason: reason.into() }
    }

    pub fn transfer_uncertain(reason: impl Into<String>) -> Self {
        PoolError::TransferUncertain { reason: reason.into() }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        PoolError::Internal { reason: reason.into() }
    }

    pub fn reason(&self) -> &str {
        match self {
            PoolError::Validation { reason }
            | PoolError::Concurrency { reason }
            | PoolError::TransferFailed { reason }
            | PoolError::TransferUncertain { reason }
            | PoolError::Internal { reason } => reason,
        }
    }
}

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolError::Validation { reason } => write!(f, "validation error: {}", reason),
            PoolError::Concurrency { reason } => write!(f, "concurrency error: {}", reason),
            PoolError::TransferFailed { reason } => write!(f, "transfer failed: {}", reason),
            PoolError::TransferUncertain { reason } => write!(f, "transfer uncertain: {}", reason),
            PoolError::Internal { reason } => write!(f, "internal error: {}", reason),
        }
    }
}
