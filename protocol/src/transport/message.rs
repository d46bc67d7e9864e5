//! Bridge wire types.
//!
//! A [`BridgeMessage`] is what the source bridge produces after burning:
//! who gets paid on the other side, how much, and at which rate the
//! recipient keeps earning. An [`Envelope`] is that message plus the
//! identity the transport assigned to it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{Address, LedgerId, TRANSPORT_BASE_FEE, TRANSPORT_FEE_PER_BYTE};

// ---------------------------------------------------------------------------
// MessageId
// ---------------------------------------------------------------------------

/// Content-addressed message identity.
///
/// `BLAKE3(source || destination || sequence || payload)`. The sequence
/// number keeps two identical transfers distinct; redelivering the same
/// envelope keeps the same id, which is the whole point.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId([u8; 32]);

impl MessageId {
    /// Derives the id for `message` at transport sequence `sequence`.
    pub fn derive(message: &BridgeMessage, sequence: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&message.source.to_be_bytes());
        hasher.update(&message.destination.to_be_bytes());
        hasher.update(&sequence.to_be_bytes());
        hasher.update(&message.encode());
        Self(*hasher.finalize().as_bytes())
    }

    /// Hex encoding, for logs and events.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// BridgeMessage
// ---------------------------------------------------------------------------

/// Payload carried from the source ledger to the destination ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeMessage {
    /// Whose tokens were burned on the source ledger.
    pub sender: Address,
    /// Who receives the mint on the destination ledger.
    pub recipient: Address,
    /// Amount burned (interest up to the burn included).
    pub amount: u64,
    /// The sender's locked rate at the time of the burn. The destination
    /// mints at this rate, not at its own global rate.
    pub locked_rate: u64,
    /// Ledger the tokens left.
    pub source: LedgerId,
    /// Ledger the tokens are headed to.
    pub destination: LedgerId,
}

impl BridgeMessage {
    /// Canonical JSON encoding. Used for hashing and fee quotes.
    pub fn encode(&self) -> Vec<u8> {
        // Serializing a struct of strings and integers cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// A message as delivered, with its transport-assigned identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// De-duplication key.
    pub id: MessageId,
    /// Transport sequence number at send time.
    pub sequence: u64,
    /// The payload.
    pub message: BridgeMessage,
}

impl Envelope {
    /// Seals `message` at `sequence`.
    pub fn seal(message: BridgeMessage, sequence: u64) -> Self {
        Self {
            id: MessageId::derive(&message, sequence),
            sequence,
            message,
        }
    }

    /// `true` if `id` is the digest of this envelope's message and sequence.
    pub fn is_intact(&self) -> bool {
        self.id == MessageId::derive(&self.message, self.sequence)
    }
}

// ---------------------------------------------------------------------------
// FeeSchedule
// ---------------------------------------------------------------------------

/// Flat fee quote: a base charge plus a per-byte charge on the encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Charged per message.
    pub base_fee: u64,
    /// Charged per encoded byte.
    pub fee_per_byte: u64,
}

impl FeeSchedule {
    /// Quote for `message`.
    pub fn quote(&self, message: &BridgeMessage) -> u64 {
        let len = message.encode().len() as u64;
        self.base_fee
            .saturating_add(self.fee_per_byte.saturating_mul(len))
    }

    /// A schedule that charges nothing.
    pub fn free() -> Self {
        Self {
            base_fee: 0,
            fee_per_byte: 0,
        }
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            base_fee: TRANSPORT_BASE_FEE,
            fee_per_byte: TRANSPORT_FEE_PER_BYTE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BridgeMessage {
        BridgeMessage {
            sender: "alice".into(),
            recipient: "bob".into(),
            amount: 1_000,
            locked_rate: 50_000_000_000,
            source: 1,
            destination: 2,
        }
    }

    #[test]
    fn id_is_stable_for_same_sequence() {
        let a = MessageId::derive(&sample(), 7);
        let b = MessageId::derive(&sample(), 7);
        assert_eq!(a, b);
    }

    #[test]
    fn id_differs_across_sequences() {
        assert_ne!(MessageId::derive(&sample(), 1), MessageId::derive(&sample(), 2));
    }

    #[test]
    fn id_commits_to_payload() {
        let mut other = sample();
        other.locked_rate += 1;
        assert_ne!(MessageId::derive(&sample(), 1), MessageId::derive(&other, 1));
    }

    #[test]
    fn edited_envelope_is_not_intact() {
        let mut envelope = Envelope::seal(sample(), 3);
        assert!(envelope.is_intact());
        envelope.message.amount += 1;
        assert!(!envelope.is_intact());
    }

    #[test]
    fn hex_display_is_64_chars() {
        let id = MessageId::derive(&sample(), 0);
        assert_eq!(id.to_string().len(), 64);
    }

    #[test]
    fn fee_grows_with_payload() {
        let schedule = FeeSchedule::default();
        let short = sample();
        let mut long = sample();
        long.recipient = "b".repeat(200);
        assert!(schedule.quote(&long) > schedule.quote(&short));
        assert!(schedule.quote(&short) >= TRANSPORT_BASE_FEE);
        assert_eq!(FeeSchedule::free().quote(&long), 0);
    }

    #[test]
    fn envelope_json_roundtrip() {
        let envelope = Envelope::seal(sample(), 3);
        let json = serde_json::to_string(&envelope).expect("serialize");
        let recovered: Envelope = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(recovered, envelope);
    }
}
