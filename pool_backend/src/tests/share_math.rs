//! Share pricing behavior: proportional minting, truncation direction,
//! the first-deposit floor, and an end-to-end pool lifecycle.

use candid::Nat;

use super::{fund_balance_cache, principal};
use crate::accounting;
use crate::error::PoolError;
use crate::ledger::TransferOutcome;
use crate::liquidity_pool::{
    self, payout_for_shares, shares_for_deposit, FIRST_DEPOSIT_FLOOR, LP_WITHDRAWAL_FEE_BPS,
};
use crate::nat_helpers::{nat_is_zero, nat_multiply, u64_to_nat};

#[test]
fn empty_pool_mints_one_share_per_unit() {
    let shares = shares_for_deposit(
        &u64_to_nat(FIRST_DEPOSIT_FLOOR),
        &u64_to_nat(0),
        &u64_to_nat(0),
    )
    .unwrap();
    assert_eq!(shares, u64_to_nat(FIRST_DEPOSIT_FLOOR));
}

#[test]
fn first_deposit_below_floor_rejected() {
    let err = shares_for_deposit(
        &u64_to_nat(FIRST_DEPOSIT_FLOOR - 1),
        &u64_to_nat(0),
        &u64_to_nat(0),
    )
    .unwrap_err();
    assert!(matches!(err, PoolError::Validation { .. }));

    // The floor only applies to an EMPTY pool
    let shares = shares_for_deposit(
        &u64_to_nat(1_000_000),
        &u64_to_nat(200_000_000),
        &u64_to_nat(200_000_000),
    )
    .unwrap();
    assert_eq!(shares, u64_to_nat(1_000_000));
}

#[test]
fn drained_pool_with_shares_rejects_deposits() {
    // Shares exist but game losses emptied the reserve: no meaningful price
    let err = shares_for_deposit(
        &u64_to_nat(FIRST_DEPOSIT_FLOOR),
        &u64_to_nat(0),
        &u64_to_nat(100),
    )
    .unwrap_err();
    assert!(matches!(err, PoolError::Validation { .. }));
}

#[test]
fn minting_truncation_favors_pool() {
    // reserve 3, total 2: depositing 5 mints floor(5*2/3) = 3 shares
    let shares =
        shares_for_deposit(&u64_to_nat(5), &u64_to_nat(3), &u64_to_nat(2)).unwrap();
    assert_eq!(shares, u64_to_nat(3));

    // minted * reserve <= amount * total_shares
    assert!(nat_multiply(&shares, &u64_to_nat(3)) <= nat_multiply(&u64_to_nat(5), &u64_to_nat(2)));
}

#[test]
fn payout_truncation_favors_pool() {
    // 1 share of (reserve 10, total 3) pays floor(10/3) = 3
    let payout =
        payout_for_shares(&u64_to_nat(1), &u64_to_nat(10), &u64_to_nat(3)).unwrap();
    assert_eq!(payout, u64_to_nat(3));

    // Property over a grid of awkward ratios: payout * total <= shares * reserve
    for reserve in [1u64, 7, 99, 1_000_003] {
        for total in [1u64, 3, 10, 999_983] {
            for shares in [1u64, 2, total / 2 + 1, total] {
                let payout = payout_for_shares(
                    &u64_to_nat(shares),
                    &u64_to_nat(reserve),
                    &u64_to_nat(total),
                )
                .unwrap();
                assert!(
                    nat_multiply(&payout, &u64_to_nat(total))
                        <= nat_multiply(&u64_to_nat(shares), &u64_to_nat(reserve)),
                    "pool lost value at reserve={} total={} shares={}",
                    reserve,
                    total,
                    shares
                );
            }
        }
    }
}

#[test]
fn payout_rejects_empty_supply_or_reserve() {
    assert!(payout_for_shares(&u64_to_nat(1), &u64_to_nat(10), &u64_to_nat(0)).is_err());
    assert!(payout_for_shares(&u64_to_nat(1), &u64_to_nat(0), &u64_to_nat(10)).is_err());
}

/// Full lifecycle at USDT scale: two LPs, a player win against the pool,
/// then the first LP exits at the diluted price.
#[test]
fn pool_lifecycle_with_game_loss() {
    fund_balance_cache();
    let (alice, bob) = (principal(1), principal(2));
    let usdt = 1_000_000u64;

    // Alice seeds the pool with 100 USDT, 1:1 shares
    let a_shares = liquidity_pool::mint_shares_after_transfer(alice, 100 * usdt, None, 1).unwrap();
    assert_eq!(a_shares, u64_to_nat(100 * usdt));

    // Bob adds 50 USDT at the same price
    let b_shares = liquidity_pool::mint_shares_after_transfer(bob, 50 * usdt, None, 2).unwrap();
    assert_eq!(b_shares, u64_to_nat(50 * usdt));

    // A player wins 30 USDT of profit from the pool
    liquidity_pool::update_pool_on_win(30 * usdt).unwrap();
    let state = liquidity_pool::get_pool_state();
    assert_eq!(state.reserve, u64_to_nat(120 * usdt));
    assert_eq!(state.total_shares, u64_to_nat(150 * usdt));

    // Alice burns all 100 USDT-worth of shares: 100 * 120 / 150 = 80 USDT
    liquidity_pool::initiate_lp_withdrawal(alice, u64_to_nat(100 * usdt), 3).unwrap();
    let completed =
        accounting::apply_transfer_outcome(alice, TransferOutcome::Success, 3).unwrap();

    let expected_fee = (80 * usdt * LP_WITHDRAWAL_FEE_BPS) / 10_000;
    assert_eq!(completed.fee, expected_fee);
    assert_eq!(completed.amount, 80 * usdt - expected_fee);

    // The FULL 80 USDT left the reserve; the fee leg is the sink's problem
    let state = liquidity_pool::get_pool_state();
    assert_eq!(state.reserve, u64_to_nat(40 * usdt));
    assert_eq!(state.total_shares, u64_to_nat(50 * usdt));

    // Bob's remaining claim is the whole reserve
    let bob_position = liquidity_pool::get_lp_position_internal(bob);
    assert_eq!(bob_position.redeemable_amount, u64_to_nat(40 * usdt));
    assert!(nat_is_zero(&liquidity_pool::get_user_shares(alice)));
}

#[test]
fn settlement_refused_when_reserve_cannot_cover_win() {
    fund_balance_cache();
    let (lp, player) = (principal(3), principal(4));

    liquidity_pool::mint_shares_after_transfer(lp, FIRST_DEPOSIT_FLOOR, None, 1).unwrap();
    accounting::credit_balance(player, 10_000_000);

    // Payout profit larger than the whole reserve
    let err = accounting::settle_bet(player, 1_000_000, FIRST_DEPOSIT_FLOOR + 2_000_000)
        .unwrap_err();
    assert!(matches!(err, PoolError::Validation { .. }));

    // Nothing moved: balance and reserve are untouched
    assert_eq!(accounting::get_balance(player), 10_000_000);
    assert_eq!(liquidity_pool::get_pool_reserve(), FIRST_DEPOSIT_FLOOR);
}

#[test]
fn settlement_moves_stake_and_payout() {
    fund_balance_cache();
    let (lp, player) = (principal(5), principal(6));

    liquidity_pool::mint_shares_after_transfer(lp, FIRST_DEPOSIT_FLOOR, None, 1).unwrap();
    accounting::credit_balance(player, 10_000_000);

    // Player loses a 4 USDT bet outright
    accounting::settle_bet(player, 4_000_000, 0).unwrap();
    assert_eq!(accounting::get_balance(player), 6_000_000);
    assert_eq!(liquidity_pool::get_pool_reserve(), FIRST_DEPOSIT_FLOOR + 4_000_000);

    // Player wins 2:1 on a 1 USDT bet
    accounting::settle_bet(player, 1_000_000, 2_000_000).unwrap();
    assert_eq!(accounting::get_balance(player), 7_000_000);
    assert_eq!(
        liquidity_pool::get_pool_reserve(),
        FIRST_DEPOSIT_FLOOR + 3_000_000
    );
}

#[test]
fn slippage_refund_credits_betting_balance() {
    fund_balance_cache();
    let (lp, late) = (principal(7), principal(8));

    liquidity_pool::mint_shares_after_transfer(lp, FIRST_DEPOSIT_FLOOR, None, 1).unwrap();
    // Price doubles: reserve grows, supply does not
    liquidity_pool::update_pool_on_loss(FIRST_DEPOSIT_FLOOR);

    // The late LP demanded 1:1 minting, which is no longer available
    let err = liquidity_pool::mint_shares_after_transfer(
        late,
        10_000_000,
        Some(Nat::from(10_000_000u64)),
        2,
    )
    .unwrap_err();
    assert!(matches!(err, PoolError::Validation { .. }));

    // Funds were not lost: they sit in the betting balance, no shares minted
    assert_eq!(accounting::get_balance(late), 10_000_000);
    assert!(nat_is_zero(&liquidity_pool::get_user_shares(late)));
}

#[test]
fn preview_matches_actual_minting() {
    fund_balance_cache();
    let lp = principal(9);

    liquidity_pool::mint_shares_after_transfer(lp, FIRST_DEPOSIT_FLOOR, None, 1).unwrap();
    liquidity_pool::update_pool_on_loss(33_333_333); // awkward price

    let preview = liquidity_pool::calculate_shares_preview(7_000_000).unwrap();
    let minted = liquidity_pool::mint_shares_after_transfer(lp, 7_000_000, None, 2).unwrap();
    assert_eq!(preview, minted);
}
