//! # Interest Accrual & Settlement
//!
//! Every account on a ledger is an [`AccountRecord`]: how many tokens were
//! actually issued (`principal`), the per-second rate the account earns
//! (`locked_rate`), and when interest was last folded into principal
//! (`last_settled`).
//!
//! ## The Balance Formula
//!
//! ```text
//! balance(now) = principal * (F + locked_rate * (now - last_settled)) / F
//! ```
//!
//! with `F = 10^18` and truncating integer division. Growth is linear
//! within one settlement period. Each settlement crystallizes the accrued
//! delta into principal and restarts the clock, so compounding happens
//! only across settlement boundaries.
//!
//! Nothing here mutates anything the caller didn't hand over by `&mut`.
//! The token contract decides when to settle; this module only knows how.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::PRECISION_FACTOR;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from the accrual math.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterestError {
    /// `now` is earlier than the last settlement. Ledger time is monotonic,
    /// so this is a bug in whoever supplied the clock.
    #[error("clock regression: now {now} is before last settlement at {last_settled}")]
    ClockRegression {
        /// The time that was supplied.
        now: u64,
        /// The record's last settlement time.
        last_settled: u64,
    },

    /// The accrued balance does not fit in a `u64`.
    #[error("accrual overflow: principal {principal} at rate {locked_rate} over {elapsed}s")]
    Overflow {
        /// Principal being accrued.
        principal: u64,
        /// Rate being applied.
        locked_rate: u64,
        /// Seconds since last settlement.
        elapsed: u64,
    },
}

// ---------------------------------------------------------------------------
// AccountRecord
// ---------------------------------------------------------------------------

/// Per-address accounting state on one ledger.
///
/// The zero value is a valid, empty account: records are created
/// implicitly on first touch and never destroyed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Tokens actually issued, excluding unsettled interest.
    pub principal: u64,

    /// Per-second rate, scale [`PRECISION_FACTOR`].
    ///
    /// Kept after the balance drains to zero, for history. The next
    /// zero-to-funded transition may overwrite it.
    pub locked_rate: u64,

    /// Unix seconds of the last settlement.
    pub last_settled: u64,
}

impl AccountRecord {
    /// Creates a record with explicit state.
    pub fn new(principal: u64, locked_rate: u64, last_settled: u64) -> Self {
        Self {
            principal,
            locked_rate,
            last_settled,
        }
    }

    /// Returns `true` if no tokens are issued to this account.
    pub fn is_empty(&self) -> bool {
        self.principal == 0
    }

    /// Interest-inclusive balance at `now`.
    ///
    /// `now == last_settled` returns `principal` unchanged.
    ///
    /// # Errors
    ///
    /// [`InterestError::ClockRegression`] if `now < last_settled`,
    /// [`InterestError::Overflow`] if the result exceeds `u64::MAX`.
    pub fn accrued_balance(&self, now: u64) -> Result<u64, InterestError> {
        let elapsed = now
            .checked_sub(self.last_settled)
            .ok_or(InterestError::ClockRegression {
                now,
                last_settled: self.last_settled,
            })?;

        if elapsed == 0 || self.principal == 0 || self.locked_rate == 0 {
            return Ok(self.principal);
        }

        let overflow = InterestError::Overflow {
            principal: self.principal,
            locked_rate: self.locked_rate,
            elapsed,
        };

        let factor = (self.locked_rate as u128)
            .checked_mul(elapsed as u128)
            .and_then(|growth| growth.checked_add(PRECISION_FACTOR))
            .ok_or_else(|| overflow.clone())?;

        let scaled = (self.principal as u128)
            .checked_mul(factor)
            .ok_or_else(|| overflow.clone())?;

        u64::try_from(scaled / PRECISION_FACTOR).map_err(|_| overflow)
    }

    /// Interest accrued since the last settlement, without settling.
    pub fn pending_interest(&self, now: u64) -> Result<u64, InterestError> {
        Ok(self.accrued_balance(now)? - self.principal)
    }

    /// Folds accrued interest into principal and moves `last_settled` to `now`.
    ///
    /// Returns the interest newly crystallized. A second call at the same
    /// `now` returns 0. On error the record is left exactly as it was.
    pub fn settle(&mut self, now: u64) -> Result<u64, InterestError> {
        let accrued = self.accrued_balance(now)?;
        let delta = accrued - self.principal;
        self.principal = accrued;
        self.last_settled = now;
        Ok(delta)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
