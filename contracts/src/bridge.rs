//! # Cross-Ledger Bridge
//!
//! Moves rebase tokens between ledgers by burning on the source and
//! minting on the destination, carrying the sender's locked rate so the
//! recipient keeps earning at the rate the sender had.
//!
//! ## Outbound
//!
//! `bridge_out` resolves the amount, takes it from the route's outbound
//! bucket, burns, and hands a [`BridgeMessage`] to the transport. If the
//! transport refuses, the burn and the bucket are both rolled back.
//!
//! ## Inbound
//!
//! The transport calls [`DeliveryEndpoint::on_deliver`]. Each
//! [`MessageId`] is applied at most once; a redelivery reports
//! [`DeliveryOutcome::Replayed`] and changes nothing. A delivery refused by
//! the inbound bucket stays unapplied and is marked retryable.
//!
//! Lock order is always token, then bridge state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use accrue_protocol::config::{Address, LedgerId};
use accrue_protocol::events::LedgerEvent;
use accrue_protocol::metrics::BridgeMetrics;
use accrue_protocol::ratelimit::{RateLimitError, RouteConfig, TokenBucket};
use accrue_protocol::roles::RoleError;
use accrue_protocol::transport::{
    BridgeMessage, DeliveryEndpoint, DeliveryOutcome, Envelope, MessageId, RejectedDelivery,
    TransportChannel, TransportError,
};
use accrue_protocol::Amount;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::rebase_token::{SharedToken, TokenError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Which way a transfer is travelling relative to this ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Leaving this ledger.
    Outbound,
    /// Arriving on this ledger.
    Inbound,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Outbound => write!(f, "outbound"),
            Direction::Inbound => write!(f, "inbound"),
        }
    }
}

/// Errors that can occur during bridge operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The token refused the burn or mint.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// The route's bucket can't cover the amount right now.
    #[error("{direction} rate limit exceeded on route {remote}: {source}")]
    RateLimitExceeded {
        /// The remote ledger of the route.
        remote: LedgerId,
        /// Which bucket refused.
        direction: Direction,
        /// Bucket details.
        source: RateLimitError,
    },

    /// No route to the requested destination.
    #[error("unsupported destination ledger {0}")]
    UnsupportedLedger(LedgerId),

    /// Inbound message from a ledger with no configured route.
    #[error("message from unknown source ledger {0}")]
    UnknownSource(LedgerId),

    /// Inbound message addressed to some other ledger.
    #[error("message for ledger {actual} delivered to ledger {expected}")]
    WrongDestination {
        /// This ledger.
        expected: LedgerId,
        /// Destination inside the message.
        actual: LedgerId,
    },

    /// The envelope's id does not match its content.
    #[error("message id {0} does not match envelope content")]
    TamperedEnvelope(MessageId),

    /// Route policy failed validation.
    #[error("invalid rate limit for route {remote}: {source}")]
    InvalidRateLimit {
        /// The remote ledger of the route.
        remote: LedgerId,
        /// Why it was rejected.
        source: RateLimitError,
    },

    /// The transport refused the message.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Caller may not administer routes.
    #[error(transparent)]
    Unauthorized(#[from] RoleError),

    /// Bridging nothing is refused.
    #[error("amount must be greater than zero")]
    ZeroAmount,
}

impl BridgeError {
    /// `true` if the same delivery may succeed later without anyone
    /// changing configuration.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::RateLimitExceeded { .. })
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// What `bridge_out` hands back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeReceipt {
    /// Id the destination will apply the message under.
    pub message_id: MessageId,
    /// Fee quoted and paid to the transport.
    pub fee: u64,
    /// Amount burned here and to be minted there.
    pub amount: u64,
    /// Rate carried to the destination.
    pub rate: u64,
}

#[derive(Clone, Debug)]
struct Route {
    config: RouteConfig,
    outbound: TokenBucket,
    inbound: TokenBucket,
}

impl Route {
    fn new(config: RouteConfig, now: u64) -> Self {
        Self {
            config,
            outbound: TokenBucket::new(config.outbound, now),
            inbound: TokenBucket::new(config.inbound, now),
        }
    }

    fn reconfigure(&mut self, config: RouteConfig, now: u64) {
        self.config = config;
        self.outbound.reconfigure(config.outbound, now);
        self.inbound.reconfigure(config.inbound, now);
    }

    fn bucket(&self, direction: Direction) -> &TokenBucket {
        match direction {
            Direction::Outbound => &self.outbound,
            Direction::Inbound => &self.inbound,
        }
    }
}

#[derive(Debug, Default)]
struct BridgeState {
    routes: HashMap<LedgerId, Route>,
    processed: HashSet<MessageId>,
}

// ---------------------------------------------------------------------------
// CrossLedgerBridge
// ---------------------------------------------------------------------------

/// One ledger's bridge endpoint.
pub struct CrossLedgerBridge {
    ledger_id: LedgerId,
    address: Address,
    token: SharedToken,
    transport: Arc<dyn TransportChannel>,
    state: Mutex<BridgeState>,
    metrics: BridgeMetrics,
}

impl CrossLedgerBridge {
    /// A bridge for `ledger_id` acting as `address` on `token`, with no
    /// routes. The token owner must grant `address` the mint-and-burn role.
    pub fn new(
        ledger_id: LedgerId,
        address: &str,
        token: SharedToken,
        transport: Arc<dyn TransportChannel>,
        metrics: BridgeMetrics,
    ) -> Self {
        Self {
            ledger_id,
            address: address.to_string(),
            token,
            transport,
            state: Mutex::new(BridgeState::default()),
            metrics,
        }
    }

    /// The ledger this bridge serves.
    pub fn ledger_id(&self) -> LedgerId {
        self.ledger_id
    }

    /// The bridge's own address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Prometheus counters for this bridge.
    pub fn metrics(&self) -> &BridgeMetrics {
        &self.metrics
    }

    // -----------------------------------------------------------------------
    // Route administration
    // -----------------------------------------------------------------------

    /// Adds or updates the route to `remote`. Owner only.
    ///
    /// Updating keeps the tokens already in each bucket, clamped to the new
    /// capacity.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Unauthorized`] for a non-owner,
    /// [`BridgeError::InvalidRateLimit`] for a bad policy,
    /// [`BridgeError::UnsupportedLedger`] for a route to this ledger.
    pub fn apply_route(
        &self,
        caller: &str,
        remote: LedgerId,
        config: RouteConfig,
    ) -> Result<(), BridgeError> {
        let now = self.require_owner(caller)?;
        if remote == self.ledger_id {
            return Err(BridgeError::UnsupportedLedger(remote));
        }
        config
            .validate()
            .map_err(|source| BridgeError::InvalidRateLimit { remote, source })?;

        let mut state = self.state.lock();
        match state.routes.get_mut(&remote) {
            Some(route) => route.reconfigure(config, now),
            None => {
                state.routes.insert(remote, Route::new(config, now));
            }
        }
        info!(ledger = self.ledger_id, remote, ?config, "route applied");
        Ok(())
    }

    /// Removes the route to `remote`. Owner only. Returns `false` if there
    /// was none.
    pub fn remove_route(&self, caller: &str, remote: LedgerId) -> Result<bool, BridgeError> {
        self.require_owner(caller)?;
        let removed = self.state.lock().routes.remove(&remote).is_some();
        if removed {
            info!(ledger = self.ledger_id, remote, "route removed");
        }
        Ok(removed)
    }

    /// Returns `true` if a route to `remote` is configured.
    pub fn is_supported(&self, remote: LedgerId) -> bool {
        self.state.lock().routes.contains_key(&remote)
    }

    /// The policy for the route to `remote`.
    pub fn route_config(&self, remote: LedgerId) -> Option<RouteConfig> {
        self.state.lock().routes.get(&remote).map(|r| r.config)
    }

    /// Tokens left in one of a route's buckets right now.
    pub fn available(&self, remote: LedgerId, direction: Direction) -> Option<u64> {
        let now = self.token.lock().now();
        self.state
            .lock()
            .routes
            .get(&remote)
            .map(|route| route.bucket(direction).available(now))
    }

    /// Returns `true` if `id` has been applied here.
    pub fn is_processed(&self, id: &MessageId) -> bool {
        self.state.lock().processed.contains(id)
    }

    fn require_owner(&self, caller: &str) -> Result<u64, BridgeError> {
        let token = self.token.lock();
        if token.owner() != caller {
            return Err(RoleError::NotOwner {
                caller: caller.to_string(),
            }
            .into());
        }
        Ok(token.now())
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Burns `sender`'s tokens here and sends a mint for `recipient` to
    /// `destination`, carrying the sender's locked rate.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::UnsupportedLedger`] if there is no route.
    /// - [`BridgeError::RateLimitExceeded`] if the outbound bucket is short;
    ///   nothing is burned.
    /// - [`BridgeError::Token`] if the burn fails.
    /// - [`BridgeError::Transport`] if the send fails; the burn is undone.
    pub fn bridge_out(
        &self,
        sender: &str,
        recipient: &str,
        amount: Amount,
        destination: LedgerId,
    ) -> Result<BridgeReceipt, BridgeError> {
        if recipient.is_empty() {
            return Err(TokenError::ZeroAddress.into());
        }
        let mut token = self.token.lock();
        let mut state = self.state.lock();
        let now = token.now();

        let route = state
            .routes
            .get_mut(&destination)
            .ok_or(BridgeError::UnsupportedLedger(destination))?;

        let value = amount.resolve(token.balance_of(sender)?);
        if value == 0 {
            return Err(BridgeError::ZeroAmount);
        }

        let bucket_before = route.outbound.clone();
        if let Err(source) = route.outbound.try_consume(value, now) {
            self.metrics.rate_limited_total.inc();
            warn!(ledger = self.ledger_id, destination, sender, value, error = %source, "outbound transfer rate limited");
            return Err(BridgeError::RateLimitExceeded {
                remote: destination,
                direction: Direction::Outbound,
                source,
            });
        }

        let rate = token.account_rate(sender);
        let checkpoint = token.checkpoint(&[sender]);
        let burned = match token.burn(&self.address, sender, Amount::Exact(value)) {
            Ok(burned) => burned,
            Err(e) => {
                route.outbound = bucket_before;
                return Err(e.into());
            }
        };

        let message = BridgeMessage {
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            amount: burned,
            locked_rate: rate,
            source: self.ledger_id,
            destination,
        };
        let fee = self.transport.quote_fee(destination, &message);
        let message_id = match self.transport.send(destination, message, fee) {
            Ok(id) => id,
            Err(e) => {
                token.restore(checkpoint);
                route.outbound = bucket_before;
                warn!(ledger = self.ledger_id, destination, sender, error = %e, "send failed, burn rolled back");
                return Err(e.into());
            }
        };

        token.record_event(LedgerEvent::BridgedOut {
            user: sender.to_string(),
            amount: burned,
            rate,
            destination,
            message_id,
        });
        self.metrics.messages_sent_total.inc();
        info!(
            ledger = self.ledger_id,
            destination,
            sender,
            recipient,
            amount = burned,
            rate,
            fee,
            id = %message_id,
            "bridged out"
        );

        Ok(BridgeReceipt {
            message_id,
            fee,
            amount: burned,
            rate,
        })
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Applies a delivered envelope: mints the carried amount to the
    /// recipient at the carried rate, once per message id.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::TamperedEnvelope`] if the id was not derived from
    ///   the message and sequence.
    /// - [`BridgeError::WrongDestination`] if the envelope is for another
    ///   ledger.
    /// - [`BridgeError::UnknownSource`] if there is no route from the source.
    /// - [`BridgeError::RateLimitExceeded`] if the inbound bucket is short;
    ///   the message stays unapplied.
    /// - [`BridgeError::Token`] if the mint fails.
    pub fn receive(&self, envelope: &Envelope) -> Result<DeliveryOutcome, BridgeError> {
        let message = &envelope.message;
        if !envelope.is_intact() {
            warn!(ledger = self.ledger_id, id = %envelope.id, "envelope id does not match content");
            return Err(BridgeError::TamperedEnvelope(envelope.id));
        }
        if message.destination != self.ledger_id {
            return Err(BridgeError::WrongDestination {
                expected: self.ledger_id,
                actual: message.destination,
            });
        }

        let mut token = self.token.lock();
        let mut state = self.state.lock();

        if state.processed.contains(&envelope.id) {
            self.metrics.messages_replayed_total.inc();
            warn!(ledger = self.ledger_id, id = %envelope.id, "replayed message ignored");
            return Ok(DeliveryOutcome::Replayed);
        }

        let now = token.now();
        let route = state
            .routes
            .get_mut(&message.source)
            .ok_or(BridgeError::UnknownSource(message.source))?;

        let bucket_before = route.inbound.clone();
        if let Err(source) = route.inbound.try_consume(message.amount, now) {
            self.metrics.rate_limited_total.inc();
            debug!(ledger = self.ledger_id, id = %envelope.id, error = %source, "inbound transfer rate limited");
            return Err(BridgeError::RateLimitExceeded {
                remote: message.source,
                direction: Direction::Inbound,
                source,
            });
        }

        if let Err(e) = token.mint(
            &self.address,
            &message.recipient,
            message.amount,
            message.locked_rate,
        ) {
            route.inbound = bucket_before;
            warn!(ledger = self.ledger_id, id = %envelope.id, error = %e, "inbound mint failed");
            return Err(e.into());
        }

        state.processed.insert(envelope.id);
        token.record_event(LedgerEvent::BridgedIn {
            user: message.recipient.clone(),
            amount: message.amount,
            rate: message.locked_rate,
            source: message.source,
            message_id: envelope.id,
        });
        self.metrics.messages_applied_total.inc();
        info!(
            ledger = self.ledger_id,
            source = message.source,
            recipient = %message.recipient,
            amount = message.amount,
            rate = message.locked_rate,
            id = %envelope.id,
            "bridged in"
        );
        Ok(DeliveryOutcome::Applied)
    }
}

impl DeliveryEndpoint for CrossLedgerBridge {
    fn on_deliver(&self, envelope: &Envelope) -> Result<DeliveryOutcome, RejectedDelivery> {
        self.receive(envelope).map_err(|e| RejectedDelivery {
            retryable: e.is_retryable(),
            reason: e.to_string(),
        })
    }
}

impl std::fmt::Debug for CrossLedgerBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CrossLedgerBridge")
            .field("ledger_id", &self.ledger_id)
            .field("address", &self.address)
            .field("routes", &state.routes.keys().collect::<Vec<_>>())
            .field("processed", &state.processed.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
