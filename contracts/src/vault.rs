//! # Vault
//!
//! Converts base asset into rebase tokens and back at 1:1 plus accrued
//! interest.
//!
//! 1. **Deposit**: tokens are minted at the current global rate, then base
//!    asset goes into custody.
//! 2. **Redeem**: tokens are burned, base asset is released.
//!
//! Both are all-or-nothing. The token lock is held across the custody call
//! so nothing else can touch the token between the two halves.
//!
//! Interest is paid out of custody reserves, so somebody has to top them
//! up with [`Vault::fund_rewards`] or late redeemers will hit
//! [`VaultError::ReleaseFailed`].

use std::sync::Arc;

use accrue_protocol::config::Address;
use accrue_protocol::events::LedgerEvent;
use accrue_protocol::Amount;
use thiserror::Error;
use tracing::{info, warn};

use crate::custody::{Custody, CustodyError};
use crate::rebase_token::{SharedToken, TokenError};

/// Errors that can occur during vault operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    /// The underlying token refused the mint or burn.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Tokens were burned but the base asset could not be paid out. The
    /// burn has been rolled back.
    #[error("release of {amount} to {redeemer} failed: {source}")]
    ReleaseFailed {
        /// Who was redeeming.
        redeemer: Address,
        /// Amount that could not be released.
        amount: u64,
        /// Custody's reason.
        source: CustodyError,
    },

    /// Custody refused to take the deposit.
    #[error("custody error: {0}")]
    Custody(#[from] CustodyError),

    /// Zero-amount deposits and reward top-ups are rejected.
    #[error("amount must be greater than zero")]
    ZeroAmount,
}

/// One ledger's vault.
pub struct Vault {
    address: Address,
    token: SharedToken,
    custody: Arc<dyn Custody>,
}

impl Vault {
    /// A vault acting as `address` on `token`. The token owner still has to
    /// grant `address` the mint-and-burn role.
    pub fn new(address: &str, token: SharedToken, custody: Arc<dyn Custody>) -> Self {
        Self {
            address: address.to_string(),
            token,
            custody,
        }
    }

    /// The vault's own address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The address of the token this vault mints.
    pub fn token_address(&self) -> Address {
        self.token.lock().address().to_string()
    }

    /// Base asset held by custody.
    pub fn custody_balance(&self) -> u64 {
        self.custody.balance()
    }

    /// Takes `amount` of base asset from `depositor` and mints the same
    /// amount of tokens locked at the current global rate.
    ///
    /// A depositor who already holds tokens has their whole position
    /// re-locked at the current global rate, after prior interest is
    /// settled at the old rate.
    ///
    /// # Errors
    ///
    /// [`VaultError::Token`] if the mint fails (nothing is taken),
    /// [`VaultError::Custody`] if the base asset can't be taken (mint undone).
    pub fn deposit(&self, depositor: &str, amount: u64) -> Result<u64, VaultError> {
        if amount == 0 {
            return Err(VaultError::ZeroAmount);
        }
        let mut token = self.token.lock();
        let checkpoint = token.checkpoint(&[depositor]);

        let rate = token.global_rate();
        token.mint(&self.address, depositor, amount, rate)?;
        if let Err(e) = self.custody.receive(depositor, amount) {
            token.restore(checkpoint);
            warn!(depositor, amount, error = %e, "custody refused deposit, mint rolled back");
            return Err(e.into());
        }

        token.record_event(LedgerEvent::Deposited {
            user: depositor.to_string(),
            amount,
        });
        info!(vault = %self.address, depositor, amount, rate, "deposited");
        Ok(amount)
    }

    /// Burns `amount` of `redeemer`'s tokens and releases the same amount of
    /// base asset. `Amount::Full` redeems the interest-inclusive balance.
    /// Returns the base asset released.
    ///
    /// # Errors
    ///
    /// [`VaultError::Token`] if the burn fails,
    /// [`VaultError::ReleaseFailed`] if custody can't pay (burn undone).
    pub fn redeem(&self, redeemer: &str, amount: Amount) -> Result<u64, VaultError> {
        let mut token = self.token.lock();
        let checkpoint = token.checkpoint(&[redeemer]);

        let burned = token.burn(&self.address, redeemer, amount)?;
        if let Err(source) = self.custody.release(redeemer, burned) {
            token.restore(checkpoint);
            warn!(redeemer, amount = burned, error = %source, "release failed, burn rolled back");
            return Err(VaultError::ReleaseFailed {
                redeemer: redeemer.to_string(),
                amount: burned,
                source,
            });
        }

        token.record_event(LedgerEvent::Redeemed {
            user: redeemer.to_string(),
            amount: burned,
        });
        info!(vault = %self.address, redeemer, amount = burned, "redeemed");
        Ok(burned)
    }

    /// Adds base asset to custody without minting anything. This is what
    /// backs the interest redeemers are paid.
    pub fn fund_rewards(&self, funder: &str, amount: u64) -> Result<(), VaultError> {
        if amount == 0 {
            return Err(VaultError::ZeroAmount);
        }
        self.custody.receive(funder, amount)?;
        info!(vault = %self.address, funder, amount, "rewards funded");
        Ok(())
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("address", &self.address)
            .field("custody_balance", &self.custody.balance())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custody::InMemoryCustody;
    use crate::rebase_token::RebaseToken;
    use accrue_protocol::clock::ManualClock;
    use accrue_protocol::config::DEFAULT_GLOBAL_RATE;
    use accrue_protocol::roles::Role;

    const OWNER: &str = "owner";

    struct Fixture {
        vault: Vault,
        token: SharedToken,
        custody: Arc<InMemoryCustody>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(0));
        let token = RebaseToken::new("token", OWNER, DEFAULT_GLOBAL_RATE, clock.clone()).into_shared();
        token
            .lock()
            .grant_role(OWNER, Role::MintAndBurn, "vault")
            .unwrap();
        let custody = Arc::new(InMemoryCustody::new());
        let vault = Vault::new("vault", token.clone(), custody.clone());
        Fixture {
            vault,
            token,
            custody,
            clock,
        }
    }

    #[test]
    fn deposit_mints_at_global_rate() {
        let f = fixture();
        f.vault.deposit("alice", 100_000).unwrap();
        let token = f.token.lock();
        assert_eq!(token.principal_of("alice"), 100_000);
        assert_eq!(token.account_rate("alice"), DEFAULT_GLOBAL_RATE);
        assert_eq!(f.vault.custody_balance(), 100_000);
    }

    #[test]
    fn immediate_full_redeem_returns_deposit() {
        let f = fixture();
        f.vault.deposit("alice", 100_000).unwrap();
        assert_eq!(f.vault.redeem("alice", Amount::Full).unwrap(), 100_000);
        assert_eq!(f.custody.paid_to("alice"), 100_000);
        assert_eq!(f.token.lock().balance_of("alice").unwrap(), 0);
    }

    #[test]
    fn full_redeem_after_accrual_pays_interest() {
        let f = fixture();
        f.vault.deposit("alice", 100_000).unwrap();
        f.vault.fund_rewards("treasury", 1_000).unwrap();
        f.clock.advance(1_000);

        assert_eq!(f.token.lock().balance_of("alice").unwrap(), 100_005);
        assert_eq!(f.vault.redeem("alice", Amount::Full).unwrap(), 100_005);
        assert_eq!(f.custody.paid_to("alice"), 100_005);
        assert_eq!(f.vault.custody_balance(), 995);
    }

    #[test]
    fn release_failure_rolls_back_burn() {
        let f = fixture();
        f.vault.deposit("alice", 100_000).unwrap();
        f.clock.advance(1_000);
        let before = f.token.lock().account("alice");
        let events_before = f.token.lock().events().len();

        // No rewards funded: reserves can't cover the interest.
        let err = f.vault.redeem("alice", Amount::Full).unwrap_err();
        assert!(matches!(err, VaultError::ReleaseFailed { amount: 100_005, .. }));

        let token = f.token.lock();
        assert_eq!(token.account("alice"), before);
        assert_eq!(token.total_principal(), 100_000);
        assert_eq!(token.events().len(), events_before);
        assert_eq!(f.vault.custody_balance(), 100_000);
    }

    #[test]
    fn blocked_recipient_keeps_tokens() {
        let f = fixture();
        f.vault.deposit("alice", 500).unwrap();
        f.custody.block_recipient("alice");
        assert!(f.vault.redeem("alice", Amount::Exact(200)).is_err());
        assert_eq!(f.token.lock().principal_of("alice"), 500);
    }

    #[test]
    fn redeem_without_role_fails() {
        let f = fixture();
        f.vault.deposit("alice", 500).unwrap();
        f.token
            .lock()
            .revoke_role(OWNER, Role::MintAndBurn, "vault")
            .unwrap();
        assert!(matches!(
            f.vault.redeem("alice", Amount::Full),
            Err(VaultError::Token(TokenError::Unauthorized(_)))
        ));
        assert_eq!(f.custody.paid_to("alice"), 0);
    }

    #[test]
    fn failed_mint_takes_nothing() {
        let f = fixture();
        f.token
            .lock()
            .revoke_role(OWNER, Role::MintAndBurn, "vault")
            .unwrap();
        f.custody.block_recipient("alice");

        assert!(matches!(
            f.vault.deposit("alice", 500),
            Err(VaultError::Token(TokenError::Unauthorized(_)))
        ));
        let token = f.token.lock();
        assert_eq!(f.vault.custody_balance(), 0);
        assert_eq!(token.principal_of("alice"), 0);
        assert_eq!(f.vault.custody_balance(), token.total_principal());
        assert_eq!(f.custody.paid_to("alice"), 0);
    }

    #[test]
    fn refused_receive_rolls_back_mint() {
        let f = fixture();
        f.vault.deposit("alice", 1_000).unwrap();
        f.clock.advance(1_000);
        let before = f.token.lock().account("alice");
        let events_before = f.token.lock().events().len();

        f.custody.block_sender("alice");
        assert!(matches!(
            f.vault.deposit("alice", 500),
            Err(VaultError::Custody(_))
        ));

        let token = f.token.lock();
        assert_eq!(token.account("alice"), before);
        assert_eq!(token.total_principal(), 1_000);
        assert_eq!(token.events().len(), events_before);
        assert_eq!(f.vault.custody_balance(), 1_000);
    }

    #[test]
    fn redeposit_relocks_at_current_rate() {
        let f = fixture();
        f.vault.deposit("alice", 100_000).unwrap();
        f.clock.advance(1_000);
        f.token
            .lock()
            .set_global_rate(OWNER, DEFAULT_GLOBAL_RATE / 2)
            .unwrap();

        f.vault.deposit("alice", 1).unwrap();
        let token = f.token.lock();
        assert_eq!(token.account_rate("alice"), DEFAULT_GLOBAL_RATE / 2);
        assert_eq!(token.principal_of("alice"), 100_006);
    }

    #[test]
    fn zero_amounts_rejected() {
        let f = fixture();
        assert_eq!(f.vault.deposit("alice", 0), Err(VaultError::ZeroAmount));
        assert_eq!(f.vault.fund_rewards("t", 0), Err(VaultError::ZeroAmount));
    }

    #[test]
    fn deposit_and_redeem_emit_events() {
        let f = fixture();
        f.vault.deposit("alice", 10).unwrap();
        f.vault.redeem("alice", Amount::Exact(4)).unwrap();
        let token = f.token.lock();
        let events: Vec<_> = token.events().iter().map(|r| r.event.clone()).collect();
        assert!(events.contains(&LedgerEvent::Deposited {
            user: "alice".into(),
            amount: 10
        }));
        assert!(events.contains(&LedgerEvent::Redeemed {
            user: "alice".into(),
            amount: 4
        }));
    }

    #[test]
    fn token_address_is_exposed() {
        let f = fixture();
        assert_eq!(f.vault.token_address(), "token");
    }
}
