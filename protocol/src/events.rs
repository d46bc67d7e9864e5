//! # Ledger Events
//!
//! Every state change on a ledger appends one [`LedgerEvent`] to the
//! ledger's [`EventLog`], stamped with ledger time. The log is for
//! auditing and tests; nothing in the protocol reads it back to make
//! decisions.

use serde::{Deserialize, Serialize};

use crate::config::{Address, LedgerId};
use crate::transport::MessageId;

/// Something that happened on a ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    /// The global rate for new depositors dropped.
    RateChanged {
        /// The new global rate.
        new_rate: u64,
    },
    /// Principal was issued.
    Minted {
        /// Recipient.
        to: Address,
        /// Principal added (excludes settled interest).
        amount: u64,
        /// Rate the account is now locked at.
        rate: u64,
    },
    /// Principal was destroyed.
    Burned {
        /// Holder.
        from: Address,
        /// Principal removed.
        amount: u64,
    },
    /// Tokens moved between accounts on this ledger.
    Transferred {
        /// Sender.
        from: Address,
        /// Recipient.
        to: Address,
        /// Amount moved.
        amount: u64,
    },
    /// Base asset entered the vault and tokens were minted.
    Deposited {
        /// Depositor.
        user: Address,
        /// Base-asset amount.
        amount: u64,
    },
    /// Tokens were burned and base asset left the vault.
    Redeemed {
        /// Redeemer.
        user: Address,
        /// Base-asset amount released.
        amount: u64,
    },
    /// Tokens were burned here and a message sent to another ledger.
    BridgedOut {
        /// Whose tokens were burned.
        user: Address,
        /// Amount burned.
        amount: u64,
        /// Rate carried in the message.
        rate: u64,
        /// Destination ledger.
        destination: LedgerId,
        /// Transport message id.
        message_id: MessageId,
    },
    /// A message from another ledger was applied here.
    BridgedIn {
        /// Recipient of the mint.
        user: Address,
        /// Amount minted.
        amount: u64,
        /// Rate preserved from the source ledger.
        rate: u64,
        /// Source ledger.
        source: LedgerId,
        /// Transport message id.
        message_id: MessageId,
    },
}

/// An event with the ledger time it happened at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Ledger time, unix seconds.
    pub at: u64,
    /// What happened.
    pub event: LedgerEvent,
}

/// Append-only event log with truncation for rollback.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EventLog {
    records: Vec<EventRecord>,
}

impl EventLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event.
    pub fn record(&mut self, at: u64, event: LedgerEvent) {
        self.records.push(EventRecord { at, event });
    }

    /// Number of events recorded.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records, oldest first.
    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    /// Drops everything recorded after the first `len` events. Used to
    /// undo a compound operation that failed half-way.
    pub fn truncate(&mut self, len: usize) {
        self.records.truncate(len);
    }

    /// Takes all records, leaving the log empty.
    pub fn drain(&mut self) -> Vec<EventRecord> {
        std::mem::take(&mut self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_truncate() {
        let mut log = EventLog::new();
        log.record(1, LedgerEvent::RateChanged { new_rate: 10 });
        let mark = log.len();
        log.record(
            2,
            LedgerEvent::Burned {
                from: "alice".into(),
                amount: 5,
            },
        );
        log.truncate(mark);
        assert_eq!(log.len(), 1);
        assert_eq!(log.records()[0].at, 1);
    }

    #[test]
    fn drain_empties_log() {
        let mut log = EventLog::new();
        log.record(1, LedgerEvent::RateChanged { new_rate: 10 });
        let drained = log.drain();
        assert_eq!(drained.len(), 1);
        assert!(log.is_empty());
    }
}
