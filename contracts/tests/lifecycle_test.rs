//! Single-ledger lifecycle tests: deposit, accrue, transfer, redeem.
//!
//! These go through `Ledger::deploy` so the vault, token and role wiring
//! are exercised the way a deployment would use them.

use std::sync::Arc;

use accrue_contracts::{InMemoryCustody, Ledger, TokenError, VaultError};
use accrue_protocol::clock::ManualClock;
use accrue_protocol::config::{LedgerConfig, DEFAULT_GLOBAL_RATE, LEDGER_ID_ORIGIN};
use accrue_protocol::events::LedgerEvent;
use accrue_protocol::transport::LocalTransport;
use accrue_protocol::Amount;

const OWNER: &str = "owner";

struct Setup {
    ledger: Ledger,
    clock: Arc<ManualClock>,
    custody: Arc<InMemoryCustody>,
}

fn setup() -> Setup {
    let clock = Arc::new(ManualClock::new(0));
    let custody = Arc::new(InMemoryCustody::new());
    let ledger = Ledger::deploy(
        LedgerConfig::devnet(LEDGER_ID_ORIGIN, OWNER),
        clock.clone(),
        custody.clone(),
        Arc::new(LocalTransport::default()),
    )
    .unwrap();
    Setup {
        ledger,
        clock,
        custody,
    }
}

// ---------------------------------------------------------------------------
// Accrual
// ---------------------------------------------------------------------------

#[test]
fn deposit_accrue_redeem_scenario() {
    let s = setup();
    let vault = s.ledger.vault();

    vault.deposit("alice", 100_000).unwrap();
    vault.fund_rewards("treasury", 10).unwrap();

    s.clock.set(1_000);
    assert_eq!(s.ledger.balance_of("alice").unwrap(), 100_005);

    let released = vault.redeem("alice", Amount::Full).unwrap();
    assert_eq!(released, 100_005);
    assert_eq!(s.custody.paid_to("alice"), 100_005);
    assert_eq!(s.ledger.balance_of("alice").unwrap(), 0);
    assert_eq!(vault.custody_balance(), 5);
}

#[test]
fn balance_never_decreases_without_outflows() {
    let s = setup();
    s.ledger.vault().deposit("alice", 7_654_321).unwrap();

    let mut last = 0;
    for _ in 0..50 {
        s.clock.advance(3_601);
        let balance = s.ledger.balance_of("alice").unwrap();
        assert!(balance >= last);
        last = balance;
    }
}

#[test]
fn balance_matches_closed_form() {
    let s = setup();
    s.ledger.vault().deposit("alice", 1_000_000_000).unwrap();
    s.clock.set(86_400);

    let expected = (1_000_000_000u128 * (1_000_000_000_000_000_000 + DEFAULT_GLOBAL_RATE as u128 * 86_400)
        / 1_000_000_000_000_000_000) as u64;
    assert_eq!(s.ledger.balance_of("alice").unwrap(), expected);
}

#[test]
fn immediate_full_redeem_returns_exact_deposit() {
    let s = setup();
    s.clock.set(5_000);
    s.ledger.vault().deposit("alice", 31_337).unwrap();
    assert_eq!(
        s.ledger.vault().redeem("alice", Amount::Full).unwrap(),
        31_337
    );
}

// ---------------------------------------------------------------------------
// Rates
// ---------------------------------------------------------------------------

#[test]
fn lowered_rate_applies_to_new_depositors_only() {
    let s = setup();
    s.ledger.vault().deposit("alice", 1_000).unwrap();
    s.ledger
        .token()
        .lock()
        .set_global_rate(OWNER, DEFAULT_GLOBAL_RATE / 10)
        .unwrap();
    s.ledger.vault().deposit("bob", 1_000).unwrap();

    let token = s.ledger.token().lock();
    assert_eq!(token.account_rate("alice"), DEFAULT_GLOBAL_RATE);
    assert_eq!(token.account_rate("bob"), DEFAULT_GLOBAL_RATE / 10);
}

#[test]
fn rejected_rate_update_leaves_rate_alone() {
    let s = setup();
    let mut token = s.ledger.token().lock();
    let before = token.global_rate();
    assert!(matches!(
        token.set_global_rate(OWNER, before * 2),
        Err(TokenError::RateIncreaseRejected { .. })
    ));
    assert!(token.set_global_rate("alice", before - 1).is_err());
    assert_eq!(token.global_rate(), before);
}

#[test]
fn redeposit_overwrites_locked_rate() {
    // A second deposit re-locks the whole position at the current global
    // rate, even if the holder had a better one.
    let s = setup();
    s.ledger.vault().deposit("alice", 100_000).unwrap();
    s.ledger
        .token()
        .lock()
        .set_global_rate(OWNER, DEFAULT_GLOBAL_RATE / 5)
        .unwrap();
    s.clock.set(1_000);
    s.ledger.vault().deposit("alice", 1).unwrap();

    let token = s.ledger.token().lock();
    assert_eq!(token.account_rate("alice"), DEFAULT_GLOBAL_RATE / 5);
    assert_eq!(token.principal_of("alice"), 100_006);
}

// ---------------------------------------------------------------------------
// Transfers
// ---------------------------------------------------------------------------

#[test]
fn transfer_carries_rate_to_fresh_account() {
    let s = setup();
    s.ledger.vault().deposit("alice", 10_000).unwrap();
    s.ledger
        .token()
        .lock()
        .set_global_rate(OWNER, 1)
        .unwrap();
    s.ledger.vault().deposit("carol", 10_000).unwrap();

    let mut token = s.ledger.token().lock();
    token.transfer("alice", "bob", Amount::Exact(2_500)).unwrap();
    token.transfer("alice", "carol", Amount::Exact(2_500)).unwrap();

    assert_eq!(token.account_rate("bob"), DEFAULT_GLOBAL_RATE);
    assert_eq!(token.account_rate("carol"), 1);
}

#[test]
fn delegated_transfer_then_redeem() {
    let s = setup();
    s.ledger.vault().deposit("alice", 1_000).unwrap();
    {
        let mut token = s.ledger.token().lock();
        token.approve("alice", "dex", 600).unwrap();
        token
            .transfer_from("dex", "alice", "bob", Amount::Exact(600))
            .unwrap();
        assert_eq!(token.allowance("alice", "dex"), 0);
    }
    assert_eq!(
        s.ledger.vault().redeem("bob", Amount::Full).unwrap(),
        600
    );
}

// ---------------------------------------------------------------------------
// Failure paths
// ---------------------------------------------------------------------------

#[test]
fn unfunded_interest_blocks_redeem_without_losing_tokens() {
    let s = setup();
    s.ledger.vault().deposit("alice", 100_000).unwrap();
    s.clock.set(1_000);

    let err = s.ledger.vault().redeem("alice", Amount::Full).unwrap_err();
    assert!(matches!(err, VaultError::ReleaseFailed { .. }));
    assert_eq!(s.ledger.balance_of("alice").unwrap(), 100_005);

    // Partial redeem within reserves still works.
    assert_eq!(
        s.ledger
            .vault()
            .redeem("alice", Amount::Exact(100_000))
            .unwrap(),
        100_000
    );
    assert_eq!(s.ledger.balance_of("alice").unwrap(), 5);
}

#[test]
fn event_log_tells_the_story() {
    let s = setup();
    s.ledger.vault().deposit("alice", 10).unwrap();
    s.clock.set(7);
    s.ledger.vault().redeem("alice", Amount::Exact(10)).unwrap();

    let events = s.ledger.token().lock().drain_events();
    let kinds: Vec<_> = events
        .iter()
        .map(|r| match &r.event {
            LedgerEvent::Minted { .. } => "minted",
            LedgerEvent::Deposited { .. } => "deposited",
            LedgerEvent::Burned { .. } => "burned",
            LedgerEvent::Redeemed { .. } => "redeemed",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, ["minted", "deposited", "burned", "redeemed"]);
    assert_eq!(events[3].at, 7);

    let json = serde_json::to_string(&events).unwrap();
    assert!(json.contains("Redeemed"));
}
