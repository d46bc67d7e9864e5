//! # Cross-Ledger Transport
//!
//! The transport is the channel that carries bridge messages from one
//! ledger to another. It is an external collaborator: the bridge only
//! depends on the [`TransportChannel`] trait (quote, send) and exposes a
//! [`DeliveryEndpoint`] (the delivery callback).
//!
//! ```text
//!   ┌──────────────┐   send(dest, msg, fee)   ┌───────────┐
//!   │ source bridge├─────────────────────────►│ transport │
//!   └──────────────┘        MessageId         └─────┬─────┘
//!                                                   │ on_deliver(envelope)
//!                                                   │ (at-least-once)
//!                                            ┌──────▼───────┐
//!                                            │ dest. bridge │
//!                                            └──────────────┘
//! ```
//!
//! ## Delivery Semantics
//!
//! Delivery is reliable and eventual but **at-least-once**: the same
//! envelope may arrive twice, and envelopes for unrelated users may arrive
//! in any order. Endpoints de-duplicate by [`MessageId`]. An endpoint can
//! ask for a retry (`retryable: true`, e.g. rate limited); anything else
//! is dead-lettered.
//!
//! Two implementations ship here:
//!
//! - [`LocalTransport`] is a deterministic in-memory queue, pumped by hand.
//! - [`ChannelTransport`] + [`Relay`] is a tokio mpsc channel with an async
//!   relay task that retries after a backoff.

pub mod channel;
pub mod local;
pub mod message;

use thiserror::Error;

use crate::config::LedgerId;

pub use channel::{ChannelTransport, Relay, RelayStats};
pub use local::{DeliveryReport, LocalTransport};
pub use message::{BridgeMessage, Envelope, FeeSchedule, MessageId};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by a transport when sending.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The fee offered is below the quote.
    #[error("insufficient fee: quoted {quoted}, offered {offered}")]
    InsufficientFee {
        /// What the transport asked for.
        quoted: u64,
        /// What the caller offered.
        offered: u64,
    },

    /// No endpoint is registered for the destination ledger.
    #[error("unknown destination ledger {0}")]
    UnknownDestination(LedgerId),

    /// The message says it is for a different ledger than the one it was
    /// sent to.
    #[error("message addressed to {addressed} was sent towards {requested}")]
    DestinationMismatch {
        /// Destination inside the message.
        addressed: LedgerId,
        /// Destination passed to `send`.
        requested: LedgerId,
    },

    /// The transport has shut down.
    #[error("transport closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Outbound side of the transport, as seen by a bridge.
pub trait TransportChannel: Send + Sync {
    /// Fee the transport charges to carry `message` to `destination`.
    fn quote_fee(&self, destination: LedgerId, message: &BridgeMessage) -> u64;

    /// Hands `message` to the transport. The returned id is how the
    /// destination will de-duplicate it.
    fn send(
        &self,
        destination: LedgerId,
        message: BridgeMessage,
        fee: u64,
    ) -> Result<MessageId, TransportError>;
}

/// What happened when an endpoint accepted a delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// First delivery; state changed.
    Applied,
    /// Already applied earlier; nothing changed.
    Replayed,
}

/// An endpoint refused a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("delivery rejected (retryable: {retryable}): {reason}")]
pub struct RejectedDelivery {
    /// Why.
    pub reason: String,
    /// `true` if the same envelope may succeed later.
    pub retryable: bool,
}

/// Inbound side: the delivery callback a transport invokes.
pub trait DeliveryEndpoint: Send + Sync {
    /// Applies `envelope` on the destination ledger.
    fn on_deliver(&self, envelope: &Envelope) -> Result<DeliveryOutcome, RejectedDelivery>;
}
