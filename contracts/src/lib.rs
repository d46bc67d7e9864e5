//! # Accrue Contracts
//!
//! The stateful side of the Accrue protocol. One instance of each contract
//! runs per ledger:
//!
//! - **Rebase Token**: interest-bearing balances with per-account locked
//!   rates, lazy settlement, and a global rate that only goes down.
//! - **Vault**: base asset in, tokens out at the current global rate; and
//!   back again, interest included.
//! - **Bridge**: burn here, mint there, with the sender's rate carried
//!   across and each message applied exactly once.
//! - **Ledger**: wires the three together from a `LedgerConfig`.
//!
//! ## Design Principles
//!
//! 1. Checked arithmetic on every balance. An overflow is an error, never
//!    a wrap.
//! 2. Compound operations are all-or-nothing. A burn whose paired release
//!    or send fails is rolled back before the error is returned.
//! 3. Privileged entry points check the caller's role first, before any
//!    state is read for mutation.
//! 4. Every state change leaves an event.

pub mod bridge;
pub mod custody;
pub mod ledger;
pub mod rebase_token;
pub mod vault;

pub use bridge::{BridgeError, BridgeReceipt, CrossLedgerBridge, Direction};
pub use custody::{Custody, CustodyError, InMemoryCustody};
pub use ledger::{Ledger, LedgerError};
pub use rebase_token::{RebaseToken, SharedToken, TokenError};
pub use vault::{Vault, VaultError};
