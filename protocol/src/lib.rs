// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Accrue Protocol: Core Library
//!
//! Accounting primitives for an interest-bearing claim token that lives on
//! more than one ledger at once. Users deposit a base asset, receive tokens
//! whose balance grows linearly at a rate locked in when they first got
//! funded, and can carry that balance *and* that rate to another ledger.
//!
//! This crate holds the parts every ledger shares. The stateful pieces
//! (token, vault, bridge) live in `accrue-contracts` and are built on top.
//!
//! ## Architecture
//!
//! - **config**: Precision factor, default rates, and `LedgerConfig`.
//! - **clock**: Where "now" comes from. System time in production, a
//!   hand-cranked clock in tests.
//! - **interest**: The account record and the accrual/settlement math.
//!   Pure functions, no side effects. Everything else builds on this.
//! - **amount**: `Exact(n)` or `Full`, instead of a magic max value.
//! - **roles**: Capability map for privileged operations.
//! - **ratelimit**: Token buckets guarding bridge routes.
//! - **transport**: Message types and the channel between ledgers.
//! - **events**: Append-only audit log of ledger events.
//! - **metrics**: Prometheus counters for bridge traffic.
//! - **telemetry**: `tracing` subscriber setup.
//!
//! ## Design Philosophy
//!
//! 1. Integer math only. Rates are fixed-point with scale `10^18`; every
//!    product goes through `u128` with checked arithmetic.
//! 2. Settlement is lazy but never skipped: any mutation settles first.
//! 3. Cross-ledger delivery is at-least-once, so application is idempotent.
//! 4. If it touches money, it has tests. Plural.

pub mod amount;
pub mod clock;
pub mod config;
pub mod events;
pub mod interest;
pub mod metrics;
pub mod ratelimit;
pub mod roles;
pub mod telemetry;
pub mod transport;

pub use amount::Amount;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Address, LedgerConfig, LedgerId};
pub use interest::{AccountRecord, InterestError};
