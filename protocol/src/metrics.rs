//! # Prometheus Metrics
//!
//! Counters for bridge traffic on one ledger. Each bridge owns a dedicated
//! [`prometheus::Registry`] labelled with its ledger id, so two ledgers in
//! one process never collide.

use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};
use std::collections::HashMap;

use crate::config::LedgerId;

/// Errors from metric registration or encoding.
pub use prometheus::Error as MetricsError;

/// Bridge counters. Cheap to clone; handles share the underlying values.
#[derive(Clone)]
pub struct BridgeMetrics {
    registry: Registry,
    /// Outbound messages handed to the transport.
    pub messages_sent_total: IntCounter,
    /// Inbound messages applied.
    pub messages_applied_total: IntCounter,
    /// Inbound messages ignored as duplicates.
    pub messages_replayed_total: IntCounter,
    /// Transfers refused by a route bucket, either direction.
    pub rate_limited_total: IntCounter,
}

impl BridgeMetrics {
    /// Creates and registers all counters for `ledger_id`.
    pub fn new(ledger_id: LedgerId) -> Result<Self, MetricsError> {
        let mut labels = HashMap::new();
        labels.insert("ledger".to_string(), ledger_id.to_string());
        let registry = Registry::new_custom(Some("accrue".into()), Some(labels))?;

        let counter = |name: &str, help: &str| -> Result<IntCounter, MetricsError> {
            let counter = IntCounter::with_opts(Opts::new(name, help))?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        let messages_sent_total = counter(
            "bridge_messages_sent_total",
            "Outbound bridge messages handed to the transport",
        )?;
        let messages_applied_total = counter(
            "bridge_messages_applied_total",
            "Inbound bridge messages applied",
        )?;
        let messages_replayed_total = counter(
            "bridge_messages_replayed_total",
            "Inbound bridge messages ignored as already applied",
        )?;
        let rate_limited_total = counter(
            "bridge_rate_limited_total",
            "Bridge transfers refused by a route rate limit",
        )?;

        Ok(Self {
            registry,
            messages_sent_total,
            messages_applied_total,
            messages_replayed_total,
            rate_limited_total,
        })
    }

    /// Prometheus text exposition of every counter.
    pub fn gather_text(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl std::fmt::Debug for BridgeMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeMetrics")
            .field("sent", &self.messages_sent_total.get())
            .field("applied", &self.messages_applied_total.get())
            .field("replayed", &self.messages_replayed_total.get())
            .field("rate_limited", &self.rate_limited_total.get())
            .finish()
    }
}
