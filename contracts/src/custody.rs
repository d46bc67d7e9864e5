//! Base-asset custody: where deposited funds actually sit.
//!
//! The vault never holds balances itself. It calls a [`Custody`] to take
//! funds in and pay them out, so the same vault logic runs against a real
//! asset adapter or the in-memory one used in tests.

use std::collections::{HashMap, HashSet};

use accrue_protocol::config::Address;
use parking_lot::Mutex;
use thiserror::Error;

/// Errors raised by a custody backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CustodyError {
    /// The custody does not hold enough base asset to pay out.
    #[error("insufficient reserves: holding {reserves}, requested {requested}")]
    InsufficientReserves {
        /// Base asset held.
        reserves: u64,
        /// Amount requested.
        requested: u64,
    },

    /// The recipient cannot receive the base asset.
    #[error("recipient {0} refused the payment")]
    RecipientRefused(Address),

    /// The sender cannot pay the base asset in.
    #[error("sender {0} could not pay")]
    SenderRefused(Address),

    /// Reserves would exceed `u64::MAX`.
    #[error("reserve overflow")]
    Overflow,
}

/// Holds the base asset backing a vault.
pub trait Custody: Send + Sync {
    /// Takes `amount` of base asset from `from` into custody.
    fn receive(&self, from: &str, amount: u64) -> Result<(), CustodyError>;

    /// Pays `amount` of base asset out to `to`.
    fn release(&self, to: &str, amount: u64) -> Result<(), CustodyError>;

    /// Base asset currently held.
    fn balance(&self) -> u64;
}

#[derive(Debug, Default)]
struct CustodyState {
    reserves: u64,
    paid: HashMap<Address, u64>,
    blocked: HashSet<Address>,
    blocked_senders: HashSet<Address>,
}

/// In-memory custody. Tracks reserves and what each address was paid, and
/// can be told to refuse payments to or from chosen addresses.
#[derive(Debug, Default)]
pub struct InMemoryCustody {
    state: Mutex<CustodyState>,
}

impl InMemoryCustody {
    /// Empty custody.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every future `release` to `recipient` fail.
    pub fn block_recipient(&self, recipient: &str) {
        self.state.lock().blocked.insert(recipient.to_string());
    }

    /// Lifts a block set by [`block_recipient`](Self::block_recipient).
    pub fn unblock_recipient(&self, recipient: &str) {
        self.state.lock().blocked.remove(recipient);
    }

    /// Makes every future `receive` from `sender` fail.
    pub fn block_sender(&self, sender: &str) {
        self.state.lock().blocked_senders.insert(sender.to_string());
    }

    /// Total base asset paid out to `recipient` so far.
    pub fn paid_to(&self, recipient: &str) -> u64 {
        self.state.lock().paid.get(recipient).copied().unwrap_or(0)
    }
}

impl Custody for InMemoryCustody {
    fn receive(&self, from: &str, amount: u64) -> Result<(), CustodyError> {
        let mut state = self.state.lock();
        if state.blocked_senders.contains(from) {
            return Err(CustodyError::SenderRefused(from.to_string()));
        }
        state.reserves = state
            .reserves
            .checked_add(amount)
            .ok_or(CustodyError::Overflow)?;
        Ok(())
    }

    fn release(&self, to: &str, amount: u64) -> Result<(), CustodyError> {
        let mut state = self.state.lock();
        if state.blocked.contains(to) {
            return Err(CustodyError::RecipientRefused(to.to_string()));
        }
        if amount > state.reserves {
            return Err(CustodyError::InsufficientReserves {
                reserves: state.reserves,
                requested: amount,
            });
        }
        state.reserves -= amount;
        *state.paid.entry(to.to_string()).or_default() += amount;
        Ok(())
    }

    fn balance(&self) -> u64 {
        self.state.lock().reserves
    }
}
