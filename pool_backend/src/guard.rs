use crate::error::PoolError;
use candid::Principal;
use std::cell::RefCell;
use std::collections::BTreeSet;

thread_local! {
    static PENDING_OPERATIONS: RefCell<BTreeSet<Principal>> = RefCell::new(BTreeSet::new());
}

/// Guard to prevent concurrent operations from the same caller.
/// Uses RAII pattern to automatically cleanup on drop.
///
/// Guard state is volatile by design: after a canister restart no in-flight
/// call can still be executing, so stale entries would only lock users out.
pub struct OperationGuard {
    caller: Principal,
}

impl OperationGuard {
    /// Create a guard for the given principal.
    /// Returns error if the principal already has a pending operation.
    pub fn for_principal(caller: Principal) -> Result<Self, PoolError> {
        PENDING_OPERATIONS.with(|ops| {
            let mut ops = ops.borrow_mut();
            if ops.contains(&caller) {
                return Err(PoolError::concurrency(
                    "Operation already in progress for this caller",
                ));
            }
            ops.insert(caller);
            Ok(Self { caller })
        })
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        PENDING_OPERATIONS.with(|ops| {
            ops.borrow_mut().remove(&self.caller);
        });
    }
}

/// Emergency safety valve: Clear stuck guard for a specific principal.
///
/// This function exists as a fail-safe in case a guard fails to drop properly
/// (e.g., canister trap during an operation). Without this, a user could
/// be permanently locked out from performing operations.
///
/// **WARNING**: This bypasses the guard protection. Only use if the user
/// reports being unable to operate and no operation is actually in flight.
///
/// Returns: true if a guard was cleared, false if no guard existed
pub fn clear_guard_for_principal(principal: Principal) -> bool {
    PENDING_OPERATIONS.with(|ops| ops.borrow_mut().remove(&principal))
}

/// Query: Check if a principal currently has an active guard
pub fn has_active_guard(principal: Principal) -> bool {
    PENDING_OPERATIONS.with(|ops| ops.borrow().contains(&principal))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(byte: u8) -> Principal {
        Principal::from_slice(&[byte; 4])
    }

    #[test]
    fn guard_prevents_concurrent_operations() {
        let _guard1 = OperationGuard::for_principal(p(1)).unwrap();

        // Second guard from same caller should fail fast
        let guard2 = OperationGuard::for_principal(p(1));
        assert!(matches!(guard2, Err(PoolError::Concurrency { .. })));
    }

    #[test]
    fn guard_allows_distinct_principals() {
        let _guard1 = OperationGuard::for_principal(p(1)).unwrap();
        let _guard2 = OperationGuard::for_principal(p(2)).unwrap();
    }

    #[test]
    fn guard_cleanup_on_drop() {
        {
            let _guard = OperationGuard::for_principal(p(3)).unwrap();
            assert!(has_active_guard(p(3)));
        } // Guard dropped here

        assert!(!has_active_guard(p(3)));
        let guard2 = OperationGuard::for_principal(p(3));
        assert!(guard2.is_ok());
    }

    #[test]
    fn guard_cleanup_on_early_return() {
        fn fallible(caller: Principal) -> Result<(), PoolError> {
            let _guard = OperationGuard::for_principal(caller)?;
            Err(PoolError::validation("forced early return"))
        }

        assert!(fallible(p(4)).is_err());
        // Early error path must still release the slot
        assert!(!has_active_guard(p(4)));
    }

    #[test]
    fn clear_guard_releases_stuck_slot() {
        let guard = OperationGuard::for_principal(p(5)).unwrap();
        std::mem::forget(guard); // Simulate a guard that never dropped

        assert!(has_active_guard(p(5)));
        assert!(clear_guard_for_principal(p(5)));
        assert!(!has_active_guard(p(5)));
        assert!(!clear_guard_for_principal(p(5)));
    }
}
