//! Crate-level behavior tests.
//!
//! These drive the real state machines (stable structures included; the
//! default memory impl is an in-process vector, and each test thread gets
//! its own) through the internal entry points that take the caller and
//! timestamp explicitly.

mod share_math;

use candid::Principal;

pub(crate) fn principal(byte: u8) -> Principal {
    Principal::from_slice(&[byte; 8])
}

/// Make the large-payout pre-flight a non-factor unless a test wants it.
pub(crate) fn fund_balance_cache() {
    crate::balance_cache::overwrite(u64::MAX / 2, 0);
}
