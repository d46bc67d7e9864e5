//! Token amounts that may mean "everything I have".

use serde::{Deserialize, Serialize};
use std::fmt;

/// An amount argument to burn, transfer, redeem, or bridge.
///
/// `Full` is resolved by the callee against the account's settled balance
/// before anything is mutated, so "redeem everything" includes interest
/// accrued up to the moment of the call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Amount {
    /// Exactly this many smallest units.
    Exact(u64),
    /// The account's entire interest-inclusive balance.
    Full,
}

impl Amount {
    /// Resolves to a concrete value given the account's full balance.
    pub fn resolve(self, full_balance: u64) -> u64 {
        match self {
            Amount::Exact(n) => n,
            Amount::Full => full_balance,
        }
    }
}

impl From<u64> for Amount {
    fn from(n: u64) -> Self {
        Amount::Exact(n)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Amount::Exact(n) => write!(f, "{}", n),
            Amount::Full => write!(f, "full balance"),
        }
    }
}
