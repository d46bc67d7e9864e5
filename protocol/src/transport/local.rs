//! In-memory transport pumped by hand.
//!
//! Nothing moves until the test (or simulation) calls [`LocalTransport::deliver_next`]
//! or [`LocalTransport::deliver_pending`]. That makes the in-flight window
//! between a source burn and a destination mint observable, and lets tests
//! replay a delivery with [`LocalTransport::redeliver`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use super::{
    BridgeMessage, DeliveryEndpoint, DeliveryOutcome, Envelope, FeeSchedule, MessageId,
    RejectedDelivery, TransportChannel, TransportError,
};
use crate::config::LedgerId;

/// Tally of one [`LocalTransport::deliver_pending`] pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Envelopes applied for the first time.
    pub applied: usize,
    /// Envelopes the endpoint had already seen.
    pub replayed: usize,
    /// Envelopes put back on the queue for a later pass.
    pub requeued: usize,
    /// Envelopes dead-lettered.
    pub dropped: usize,
}

#[derive(Default)]
struct QueueState {
    sequence: u64,
    queue: VecDeque<Envelope>,
    sent: HashMap<MessageId, Envelope>,
    dead_letters: Vec<(Envelope, String)>,
}

/// Deterministic in-memory transport shared by every ledger in a test.
///
/// Endpoints are held weakly so a bridge that owns an `Arc` to this
/// transport doesn't keep itself alive through it.
pub struct LocalTransport {
    fees: FeeSchedule,
    state: Mutex<QueueState>,
    endpoints: RwLock<HashMap<LedgerId, Weak<dyn DeliveryEndpoint>>>,
}

impl LocalTransport {
    /// Creates an empty transport with the given fee schedule.
    pub fn new(fees: FeeSchedule) -> Self {
        Self {
            fees,
            state: Mutex::new(QueueState::default()),
            endpoints: RwLock::new(HashMap::new()),
        }
    }

    /// Routes deliveries for `ledger` to `endpoint`. Replaces any previous
    /// registration.
    pub fn register(&self, ledger: LedgerId, endpoint: Arc<dyn DeliveryEndpoint>) {
        self.endpoints
            .write()
            .insert(ledger, Arc::downgrade(&endpoint));
    }

    /// Messages sent but not yet successfully delivered.
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Envelopes that were rejected for good, with the reason.
    pub fn dead_letters(&self) -> Vec<(Envelope, String)> {
        self.state.lock().dead_letters.clone()
    }

    /// Delivers the oldest queued envelope. Returns `None` if the queue is
    /// empty. Retryable rejections go to the back of the queue.
    pub fn deliver_next(&self) -> Option<Result<DeliveryOutcome, RejectedDelivery>> {
        let envelope = self.state.lock().queue.pop_front()?;
        let result = self.dispatch(&envelope);
        match &result {
            Ok(outcome) => {
                debug!(id = %envelope.id, ?outcome, "envelope delivered");
            }
            Err(rejection) if rejection.retryable => {
                debug!(id = %envelope.id, reason = %rejection.reason, "delivery deferred");
                self.state.lock().queue.push_back(envelope);
            }
            Err(rejection) => {
                warn!(id = %envelope.id, reason = %rejection.reason, "envelope dead-lettered");
                self.state
                    .lock()
                    .dead_letters
                    .push((envelope, rejection.reason.clone()));
            }
        }
        Some(result)
    }

    /// Attempts every envelope that was queued when the call started,
    /// once each.
    pub fn deliver_pending(&self) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let batch = self.pending();
        for _ in 0..batch {
            match self.deliver_next() {
                Some(Ok(DeliveryOutcome::Applied)) => report.applied += 1,
                Some(Ok(DeliveryOutcome::Replayed)) => report.replayed += 1,
                Some(Err(rejection)) if rejection.retryable => report.requeued += 1,
                Some(Err(_)) => report.dropped += 1,
                None => break,
            }
        }
        report
    }

    /// Delivers an already-sent envelope again, as an at-least-once
    /// channel might. Does not touch the queue.
    pub fn redeliver(&self, id: &MessageId) -> Option<Result<DeliveryOutcome, RejectedDelivery>> {
        let envelope = self.state.lock().sent.get(id).cloned()?;
        Some(self.dispatch(&envelope))
    }

    fn dispatch(&self, envelope: &Envelope) -> Result<DeliveryOutcome, RejectedDelivery> {
        let destination = envelope.message.destination;
        let endpoint = self
            .endpoints
            .read()
            .get(&destination)
            .and_then(Weak::upgrade)
            .ok_or_else(|| RejectedDelivery {
                reason: TransportError::UnknownDestination(destination).to_string(),
                retryable: true,
            })?;
        endpoint.on_deliver(envelope)
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new(FeeSchedule::default())
    }
}

impl TransportChannel for LocalTransport {
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
        if !self.endpoints.read().contains_key(&destination) {
            return Err(TransportError::UnknownDestination(destination));
        }
        let quoted = self.fees.quote(&message);
        if fee < quoted {
            return Err(TransportError::InsufficientFee {
                quoted,
                offered: fee,
            });
        }

        let mut state = self.state.lock();
        let envelope = Envelope::seal(message, state.sequence);
        state.sequence += 1;
        let id = envelope.id;
        state.sent.insert(id, envelope.clone());
        state.queue.push_back(envelope);
        debug!(%id, destination, fee, "envelope queued");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Endpoint that applies each id once and can be told to defer.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<MessageId>>,
        defer_remaining: AtomicUsize,
    }

    impl DeliveryEndpoint for Recorder {
        fn on_deliver(&self, envelope: &Envelope) -> Result<DeliveryOutcome, RejectedDelivery> {
            if self.defer_remaining.load(Ordering::SeqCst) > 0 {
                self.defer_remaining.fetch_sub(1, Ordering::SeqCst);
                return Err(RejectedDelivery {
                    reason: "busy".into(),
                    retryable: true,
                });
            }
            let mut seen = self.seen.lock();
            if seen.contains(&envelope.id) {
                return Ok(DeliveryOutcome::Replayed);
            }
            seen.push(envelope.id);
            Ok(DeliveryOutcome::Applied)
        }
    }

    fn message(to: LedgerId) -> BridgeMessage {
        BridgeMessage {
            sender: "alice".into(),
            recipient: "alice".into(),
            amount: 10,
            locked_rate: 1,
            source: 1,
            destination: to,
        }
    }

    #[test]
    fn send_to_unregistered_ledger_fails() {
        let transport = LocalTransport::new(FeeSchedule::free());
        let err = transport.send(2, message(2), 0).unwrap_err();
        assert_eq!(err, TransportError::UnknownDestination(2));
    }

    #[test]
    fn underpaying_fee_fails() {
        let transport = LocalTransport::default();
        let recorder: Arc<dyn DeliveryEndpoint> = Arc::new(Recorder::default());
        transport.register(2, Arc::clone(&recorder));
        let err = transport.send(2, message(2), 1).unwrap_err();
        assert!(matches!(err, TransportError::InsufficientFee { .. }));
        assert_eq!(transport.pending(), 0);
    }

    #[test]
    fn mismatched_destination_fails() {
        let transport = LocalTransport::new(FeeSchedule::free());
        let err = transport.send(3, message(2), 0).unwrap_err();
        assert!(matches!(err, TransportError::DestinationMismatch { .. }));
    }

    #[test]
    fn deliver_pending_applies_in_order() {
        let transport = LocalTransport::new(FeeSchedule::free());
        let recorder = Arc::new(Recorder::default());
        transport.register(2, recorder.clone());

        let first = transport.send(2, message(2), 0).unwrap();
        let second = transport.send(2, message(2), 0).unwrap();
        assert_ne!(first, second);
        assert_eq!(transport.pending(), 2);

        let report = transport.deliver_pending();
        assert_eq!(report.applied, 2);
        assert_eq!(transport.pending(), 0);
        assert_eq!(*recorder.seen.lock(), vec![first, second]);
    }

    #[test]
    fn redelivery_is_reported_as_replay() {
        let transport = LocalTransport::new(FeeSchedule::free());
        let recorder = Arc::new(Recorder::default());
        transport.register(2, recorder.clone());

        let id = transport.send(2, message(2), 0).unwrap();
        transport.deliver_pending();
        assert_eq!(transport.redeliver(&id), Some(Ok(DeliveryOutcome::Replayed)));
    }

    #[test]
    fn retryable_rejection_is_requeued() {
        let transport = LocalTransport::new(FeeSchedule::free());
        let recorder = Arc::new(Recorder::default());
        recorder.defer_remaining.store(1, Ordering::SeqCst);
        transport.register(2, recorder.clone());

        transport.send(2, message(2), 0).unwrap();
        let report = transport.deliver_pending();
        assert_eq!(report.requeued, 1);
        assert_eq!(transport.pending(), 1);

        let report = transport.deliver_pending();
        assert_eq!(report.applied, 1);
        assert_eq!(transport.pending(), 0);
    }

    #[test]
    fn dropped_endpoint_defers_delivery() {
        let transport = LocalTransport::new(FeeSchedule::free());
        {
            let recorder: Arc<dyn DeliveryEndpoint> = Arc::new(Recorder::default());
            transport.register(2, Arc::clone(&recorder));
            transport.send(2, message(2), 0).unwrap();
        }
        let report = transport.deliver_pending();
        assert_eq!(report.requeued, 1);
    }
}
