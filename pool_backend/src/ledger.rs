//! External ledger boundary.
//!
//! Every fund movement in or out of the canister goes through this module.
//! Outbound transfers are classified into three outcomes because an
//! inter-canister call can time out: the transfer may have happened even
//! though we never saw a reply. Callers must treat `Uncertain` as
//! "funds possibly moved" and never roll back on it.

use candid::{Nat, Principal};
use ic_cdk::api::call::RejectionCode;

use crate::error::PoolError;
use crate::nat_helpers::u64_to_nat;
use crate::types::{
    sanitize_error, Account, TransferArg, TransferError, TransferFromArgs, TransferFromError,
    CKUSDT_CANISTER_ID, CKUSDT_TRANSFER_FEE,
};

pub fn ledger_canister_id() -> Principal {
    Principal::from_text(CKUSDT_CANISTER_ID).expect("Invalid ckUSDT canister ID")
}

/// Classified result of an outbound ledger transfer.
#[derive(Clone, Debug, PartialEq)]
pub enum TransferOutcome {
    /// The ledger confirmed the transfer (or deduplicated a retry of an
    /// already-successful one).
    Success,
    /// The ledger (or the system) confirmed nothing was transferred.
    DefiniteFailure(String),
    /// No confirmation either way. Funds may have left the canister.
    Uncertain(String),
}

/// Map the raw inter-canister call result onto the three-way outcome.
///
/// Idempotency note: retries re-send the same `created_at_time`, so a
/// `Duplicate` reply means the original attempt landed - that is a success,
/// not an error. `TooOld` means the dedup window has passed and the original
/// outcome can no longer be confirmed, so it stays uncertain.
pub fn classify_transfer_result(
    result: Result<Result<Nat, TransferError>, (RejectionCode, String)>,
) -> TransferOutcome {
    match result {
        Ok(Ok(_block)) => TransferOutcome::Success,
        Ok(Err(TransferError::Duplicate { .. })) => TransferOutcome::Success,
        Ok(Err(TransferError::TooOld)) => {
            TransferOutcome::Uncertain("Ledger dedup window elapsed (TooOld)".to_string())
        }
        Ok(Err(e)) => TransferOutcome::DefiniteFailure(sanitize_error(&format!("{:?}", e))),
        Err((code, msg)) => match code {
            RejectionCode::SysTransient | RejectionCode::Unknown => {
                TransferOutcome::Uncertain(sanitize_error(&format!("{:?}: {}", code, msg)))
            }
            _ => TransferOutcome::DefiniteFailure(sanitize_error(&format!("{:?}: {}", code, msg))),
        },
    }
}

/// Send `amount` to `to` from the canister's default account.
///
/// The ledger fee is paid out of `amount`, so the recipient receives
/// `amount - CKUSDT_TRANSFER_FEE`. `created_at` is the ledger idempotency
/// key: retries MUST pass the same value they recorded at initiation.
pub async fn transfer_to(to: Principal, amount: u64, created_at: Option<u64>) -> TransferOutcome {
    if amount <= CKUSDT_TRANSFER_FEE {
        return TransferOutcome::DefiniteFailure(format!(
            "Amount {} does not cover ledger fee {}",
            amount, CKUSDT_TRANSFER_FEE
        ));
    }

    let args = TransferArg {
        from_subaccount: None,
        to: Account::from(to),
        amount: u64_to_nat(amount - CKUSDT_TRANSFER_FEE),
        fee: Some(u64_to_nat(CKUSDT_TRANSFER_FEE)),
        memo: None,
        created_at_time: created_at,
    };

    let call_result: Result<(Result<Nat, TransferError>,), (RejectionCode, String)> =
        ic_cdk::call(ledger_canister_id(), "icrc1_transfer", (args,)).await;

    classify_transfer_result(call_result.map(|(inner,)| inner))
}

/// Pull `amount` from `from` into the canister (requires prior ICRC-2
/// approval by the user). A rejected pull is always definite: nothing moved.
pub async fn pull_from(from: Principal, amount: u64) -> Result<Nat, PoolError> {
    let args = TransferFromArgs {
        spender_subaccount: None,
        from: Account::from(from),
        to: Account::from(ic_cdk::id()),
        amount: u64_to_nat(amount),
        // Explicitly charge fee to sender to prevent protocol loss
        fee: Some(u64_to_nat(CKUSDT_TRANSFER_FEE)),
        memo: None,
        created_at_time: None,
    };

    let (result,): (Result<Nat, TransferFromError>,) =
        ic_cdk::call(ledger_canister_id(), "icrc2_transfer_from", (args,))
            .await
            .map_err(|(code, msg)| {
                PoolError::transfer_failed(sanitize_error(&format!("Call failed: {:?} {}", code, msg)))
            })?;

    result.map_err(|e| PoolError::transfer_failed(sanitize_error(&format!("Transfer failed: {:?}", e))))
}

/// Ground truth for the balance cache: the canister's real ledger balance.
pub async fn query_ledger_balance() -> Result<u64, PoolError> {
    let (balance,): (Nat,) = ic_cdk::call(
        ledger_canister_id(),
        "icrc1_balance_of",
        (Account::from(ic_cdk::id()),),
    )
    .await
    .map_err(|(code, msg)| {
        PoolError::transfer_failed(sanitize_error(&format!("Balance query failed: {:?} {}", code, msg)))
    })?;

    crate::nat_helpers::nat_to_u64(&balance)
        .ok_or_else(|| PoolError::internal("Ledger balance exceeds u64"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmed_block_is_success() {
        let outcome = classify_transfer_result(Ok(Ok(u64_to_nat(42))));
        assert_eq!(outcome, TransferOutcome::Success);
    }

    #[test]
    fn duplicate_counts_as_success() {
        // A retry with the same created_at that hits the dedup window means
        // the original transfer landed - exactly one payout happened.
        let outcome = classify_transfer_result(Ok(Err(TransferError::Duplicate {
            duplicate_of: u64_to_nat(7),
        })));
        assert_eq!(outcome, TransferOutcome::Success);
    }

    #[test]
    fn too_old_stays_uncertain() {
        let outcome = classify_transfer_result(Ok(Err(TransferError::TooOld)));
        assert!(matches!(outcome, TransferOutcome::Uncertain(_)));
    }

    #[test]
    fn ledger_rejection_is_definite() {
        let outcome = classify_transfer_result(Ok(Err(TransferError::InsufficientFunds {
            balance: u64_to_nat(0),
        })));
        assert!(matches!(outcome, TransferOutcome::DefiniteFailure(_)));
    }

    #[test]
    fn transient_rejection_is_uncertain() {
        let outcome = classify_transfer_result(Err((
            RejectionCode::SysTransient,
            "timeout".to_string(),
        )));
        assert!(matches!(outcome, TransferOutcome::Uncertain(_)));

        let outcome = classify_transfer_result(Err((
            RejectionCode::Unknown,
            "no reply".to_string(),
        )));
        assert!(matches!(outcome, TransferOutcome::Uncertain(_)));
    }

    #[test]
    fn permanent_rejection_is_definite() {
        let outcome = classify_transfer_result(Err((
            RejectionCode::DestinationInvalid,
            "no such canister".to_string(),
        )));
        assert!(matches!(outcome, TransferOutcome::DefiniteFailure(_)));
    }
}
