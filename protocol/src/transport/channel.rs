//! Async transport: a tokio channel plus a relay task.
//!
//! Bridges hold a [`ChannelTransport`] and `send` into an unbounded mpsc
//! channel. A [`Relay`] task drains the channel and calls the destination
//! endpoint, sleeping and retrying when the endpoint asks for it. The relay
//! stops when its shutdown signal fires or every sender is gone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{
    BridgeMessage, DeliveryEndpoint, DeliveryOutcome, Envelope, FeeSchedule, MessageId,
    TransportChannel, TransportError,
};
use crate::config::{LedgerId, RELAY_MAX_ATTEMPTS, RELAY_RETRY_BACKOFF_MS};

// ---------------------------------------------------------------------------
// ChannelTransport
// ---------------------------------------------------------------------------

/// Sending half: what bridges see.
pub struct ChannelTransport {
    fees: FeeSchedule,
    sequence: AtomicU64,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl ChannelTransport {
    /// Creates the sending half and the receiver a [`Relay`] should drain.
    pub fn new(fees: FeeSchedule) -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                fees,
                sequence: AtomicU64::new(0),
                tx,
            },
            rx,
        )
    }
}

impl TransportChannel for ChannelTransport {
    fn quote_fee(&self, _destination: LedgerId, message: &BridgeMessage) -> u64 {
        self.fees.quote(message)
    }

    fn send(
        &self,
        destination: LedgerId,
        message: BridgeMessage,
        fee: u64,
    ) -> Result<MessageId, TransportError> {
        if message.destination != destination {
            return Err(TransportError::DestinationMismatch {
                addressed: message.destination,
                requested: destination,
            });
        }
        let quoted = self.fees.quote(&message);
        if fee < quoted {
            return Err(TransportError::InsufficientFee {
                quoted,
                offered: fee,
            });
        }
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = Envelope::seal(message, sequence);
        let id = envelope.id;
        self.tx.send(envelope).map_err(|_| TransportError::Closed)?;
        Ok(id)
    }
}

// ---------------------------------------------------------------------------
// Relay
// ---------------------------------------------------------------------------

/// Counters returned when a relay stops.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Envelopes applied.
    pub applied: u64,
    /// Envelopes the destination had already applied.
    pub replayed: u64,
    /// Retries performed (not counting first attempts).
    pub retries: u64,
    /// Envelopes given up on.
    pub dead_lettered: u64,
}

/// Delivers envelopes from a channel to registered endpoints.
pub struct Relay {
    endpoints: HashMap<LedgerId, Arc<dyn DeliveryEndpoint>>,
    retry_backoff: Duration,
    max_attempts: u32,
}

impl Relay {
    /// A relay with the default backoff and attempt budget.
    pub fn new() -> Self {
        Self {
            endpoints: HashMap::new(),
            retry_backoff: Duration::from_millis(RELAY_RETRY_BACKOFF_MS),
            max_attempts: RELAY_MAX_ATTEMPTS,
        }
    }

    /// Overrides the retry policy.
    pub fn with_retry(mut self, backoff: Duration, max_attempts: u32) -> Self {
        self.retry_backoff = backoff;
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Routes deliveries for `ledger` to `endpoint`.
    pub fn register(&mut self, ledger: LedgerId, endpoint: Arc<dyn DeliveryEndpoint>) {
        self.endpoints.insert(ledger, endpoint);
    }

    /// Runs until `shutdown` fires or the channel closes.
    ///
    /// Envelopes are handled one at a time, in arrival order. A retryable
    /// rejection blocks the relay for the backoff; that is acceptable for a
    /// local relay and keeps per-route ordering intact.
    pub async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<Envelope>,
        mut shutdown: oneshot::Receiver<()>,
    ) -> RelayStats {
        let mut stats = RelayStats::default();
        info!(endpoints = self.endpoints.len(), "relay started");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                next = rx.recv() => match next {
                    Some(envelope) => self.deliver(envelope, &mut stats).await,
                    None => break,
                },
            }
        }

        info!(?stats, "relay stopped");
        stats
    }

    async fn deliver(&self, envelope: Envelope, stats: &mut RelayStats) {
        let destination = envelope.message.destination;
        let Some(endpoint) = self.endpoints.get(&destination) else {
            warn!(id = %envelope.id, destination, "no endpoint for destination");
            stats.dead_lettered += 1;
            return;
        };

        for attempt in 1..=self.max_attempts {
            match endpoint.on_deliver(&envelope) {
                Ok(DeliveryOutcome::Applied) => {
                    debug!(id = %envelope.id, attempt, "relayed");
                    stats.applied += 1;
                    return;
                }
                Ok(DeliveryOutcome::Replayed) => {
                    stats.replayed += 1;
                    return;
                }
                Err(rejection) if rejection.retryable && attempt < self.max_attempts => {
                    debug!(id = %envelope.id, attempt, reason = %rejection.reason, "retrying");
                    stats.retries += 1;
                    tokio::time::sleep(self.retry_backoff).await;
                }
                Err(rejection) => {
                    warn!(id = %envelope.id, attempt, reason = %rejection.reason, "dead-lettered");
                    stats.dead_lettered += 1;
                    return;
                }
            }
        }
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}
