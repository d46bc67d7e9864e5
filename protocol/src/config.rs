//! # Protocol Configuration & Constants
//!
//! Every magic number in Accrue lives here, along with [`LedgerConfig`],
//! the serde-loadable description of one ledger deployment.
//!
//! Changing the precision factor after launch would silently rescale every
//! locked rate in existence. Don't.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ratelimit::{RateLimitConfig, RateLimitError, RouteConfig};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identifies one independent ledger (a chain selector, in bridge terms).
pub type LedgerId = u64;

/// Account address on a ledger. Opaque to the protocol; compared byte-wise.
pub type Address = String;

/// Devnet origin ledger, where the vault usually lives.
pub const LEDGER_ID_ORIGIN: LedgerId = 0x4143_5230; // "ACR0"

/// Devnet satellite ledger: token and bridge only, no vault deposits.
pub const LEDGER_ID_SATELLITE: LedgerId = 0x4143_5231; // "ACR1"

// ---------------------------------------------------------------------------
// Interest Parameters
// ---------------------------------------------------------------------------

/// Fixed-point scale for interest rates. A rate of `PRECISION_FACTOR`
/// means "100% per second", which should never happen outside tests.
pub const PRECISION_FACTOR: u128 = 1_000_000_000_000_000_000;

/// Starting global rate for a fresh ledger: `5 * 10^18 / 10^8`, i.e.
/// 5e-8 per second, roughly 158% simple interest per year.
pub const DEFAULT_GLOBAL_RATE: u64 = 50_000_000_000;

// ---------------------------------------------------------------------------
// Bridge Parameters
// ---------------------------------------------------------------------------

/// Default bucket capacity for a bridge route, in token units.
pub const DEFAULT_ROUTE_CAPACITY: u64 = 1_000_000_000;

/// Default bucket refill, in token units per second.
pub const DEFAULT_ROUTE_REFILL_RATE: u64 = 10_000_000;

/// Flat part of the transport fee quote.
pub const TRANSPORT_BASE_FEE: u64 = 1_000;

/// Per-byte part of the transport fee quote, charged on the encoded message.
pub const TRANSPORT_FEE_PER_BYTE: u64 = 4;

/// How long the relay waits before retrying a delivery the destination
/// asked to retry (rate limited).
pub const RELAY_RETRY_BACKOFF_MS: u64 = 250;

/// Delivery attempts before the relay gives up and dead-letters a message.
pub const RELAY_MAX_ATTEMPTS: u32 = 20;

// ---------------------------------------------------------------------------
// LedgerConfig
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating a [`LedgerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The JSON document could not be parsed.
    #[error("malformed ledger config: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A required address field is empty.
    #[error("missing address for {0}")]
    MissingAddress(&'static str),

    /// Two roles were given the same address.
    #[error("address {0} is assigned to more than one component")]
    DuplicateAddress(Address),

    /// A route points back at the ledger itself.
    #[error("ledger {0} cannot route to itself")]
    SelfRoute(LedgerId),

    /// The same remote ledger appears twice in the route list.
    #[error("duplicate route to ledger {0}")]
    DuplicateRoute(LedgerId),

    /// A route carries an invalid rate-limit policy.
    #[error("route to ledger {remote}: {source}")]
    InvalidRoute {
        /// The remote ledger of the offending route.
        remote: LedgerId,
        /// What was wrong with it.
        #[source]
        source: RateLimitError,
    },
}

/// A configured route from this ledger to one remote ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    /// The remote ledger.
    pub remote: LedgerId,
    /// Outbound and inbound rate-limit policy.
    #[serde(default)]
    pub limits: RouteConfig,
}

/// Everything needed to stand up one ledger: token, vault, and bridge.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// This ledger's identifier.
    pub ledger_id: LedgerId,
    /// Administrator: sets the global rate, grants roles, edits routes.
    pub owner: Address,
    /// Address of the token instance itself.
    pub token_address: Address,
    /// Address the vault acts as when minting and burning.
    pub vault_address: Address,
    /// Address the bridge acts as when minting and burning.
    pub bridge_address: Address,
    /// Global rate at deployment, scale [`PRECISION_FACTOR`].
    #[serde(default = "default_global_rate")]
    pub initial_global_rate: u64,
    /// Remote ledgers this one can bridge to and from.
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
}

fn default_global_rate() -> u64 {
    DEFAULT_GLOBAL_RATE
}

impl LedgerConfig {
    /// Devnet-style config for `ledger_id` with addresses derived from the id.
    pub fn devnet(ledger_id: LedgerId, owner: &str) -> Self {
        Self {
            ledger_id,
            owner: owner.to_string(),
            token_address: format!("token-{:08x}", ledger_id),
            vault_address: format!("vault-{:08x}", ledger_id),
            bridge_address: format!("bridge-{:08x}", ledger_id),
            initial_global_rate: DEFAULT_GLOBAL_RATE,
            routes: Vec::new(),
        }
    }

    /// Adds a route with the given limits and returns `self` for chaining.
    pub fn with_route(mut self, remote: LedgerId, limits: RouteConfig) -> Self {
        self.routes.push(RouteSpec { remote, limits });
        self
    }

    /// Overrides the initial global rate.
    pub fn with_global_rate(mut self, rate: u64) -> Self {
        self.initial_global_rate = rate;
        self
    }

    /// Parses and validates a JSON config document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks addresses and route policies.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let addresses = [
            ("owner", &self.owner),
            ("token", &self.token_address),
            ("vault", &self.vault_address),
            ("bridge", &self.bridge_address),
        ];
        for (label, address) in addresses {
            if address.is_empty() {
                return Err(ConfigError::MissingAddress(label));
            }
        }
        for (i, (_, a)) in addresses.iter().enumerate() {
            if addresses[i + 1..].iter().any(|(_, b)| a == b) {
                return Err(ConfigError::DuplicateAddress((*a).clone()));
            }
        }

        for (i, route) in self.routes.iter().enumerate() {
            if route.remote == self.ledger_id {
                return Err(ConfigError::SelfRoute(route.remote));
            }
            if self.routes[..i].iter().any(|r| r.remote == route.remote) {
                return Err(ConfigError::DuplicateRoute(route.remote));
            }
            route
                .limits
                .validate()
                .map_err(|source| ConfigError::InvalidRoute {
                    remote: route.remote,
                    source,
                })?;
        }
        Ok(())
    }
}

/// The rate-limit policy new routes get unless told otherwise.
pub fn default_route_limit() -> RateLimitConfig {
    RateLimitConfig::new(DEFAULT_ROUTE_CAPACITY, DEFAULT_ROUTE_REFILL_RATE)
}

/// Friendly ledger name for logs. Unknown ids get a hex dump.
pub fn ledger_name(ledger_id: LedgerId) -> String {
    match ledger_id {
        LEDGER_ID_ORIGIN => "origin".to_string(),
        LEDGER_ID_SATELLITE => "satellite".to_string(),
        other => format!("ledger(0x{:08X})", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_ids_are_distinct() {
        assert_ne!(LEDGER_ID_ORIGIN, LEDGER_ID_SATELLITE);
    }

    #[test]
    fn test_default_rate_matches_scale() {
        // 5e18 / 1e8
        assert_eq!(DEFAULT_GLOBAL_RATE as u128, 5 * PRECISION_FACTOR / 100_000_000);
    }

    #[test]
    fn test_ledger_name_formatting() {
        assert_eq!(ledger_name(LEDGER_ID_ORIGIN), "origin");
        assert_eq!(ledger_name(0xCAFEBABE), "ledger(0xCAFEBABE)");
    }

    #[test]
    fn devnet_config_is_valid() {
        let config = LedgerConfig::devnet(LEDGER_ID_ORIGIN, "owner")
            .with_route(LEDGER_ID_SATELLITE, RouteConfig::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.initial_global_rate, DEFAULT_GLOBAL_RATE);
    }

    #[test]
    fn self_route_rejected() {
        let config = LedgerConfig::devnet(LEDGER_ID_ORIGIN, "owner")
            .with_route(LEDGER_ID_ORIGIN, RouteConfig::default());
        assert!(matches!(config.validate(), Err(ConfigError::SelfRoute(_))));
    }

    #[test]
    fn duplicate_route_rejected() {
        let config = LedgerConfig::devnet(LEDGER_ID_ORIGIN, "owner")
            .with_route(LEDGER_ID_SATELLITE, RouteConfig::default())
            .with_route(LEDGER_ID_SATELLITE, RouteConfig::default());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateRoute(LEDGER_ID_SATELLITE))
        ));
    }

    #[test]
    fn shared_address_rejected() {
        let mut config = LedgerConfig::devnet(LEDGER_ID_ORIGIN, "owner");
        config.vault_address = config.bridge_address.clone();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateAddress(_))
        ));
    }

    #[test]
    fn json_config_fills_defaults() {
        let json = r#"{
            "ledger_id": 7,
            "owner": "admin",
            "token_address": "tok",
            "vault_address": "vlt",
            "bridge_address": "brg",
            "routes": [
                { "remote": 9, "limits": {
                    "outbound": { "enabled": true, "capacity": 500, "refill_rate": 5 },
                    "inbound": { "enabled": false, "capacity": 0, "refill_rate": 0 }
                } }
            ]
        }"#;
        let config = LedgerConfig::from_json(json).unwrap();
        assert_eq!(config.initial_global_rate, DEFAULT_GLOBAL_RATE);
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].limits.outbound.capacity, 500);
        assert!(!config.routes[0].limits.inbound.enabled);
    }

    #[test]
    fn json_config_with_bad_limit_rejected() {
        let json = r#"{
            "ledger_id": 7,
            "owner": "admin",
            "token_address": "tok",
            "vault_address": "vlt",
            "bridge_address": "brg",
            "routes": [
                { "remote": 9, "limits": {
                    "outbound": { "enabled": true, "capacity": 5, "refill_rate": 50 },
                    "inbound": { "enabled": false, "capacity": 0, "refill_rate": 0 }
                } }
            ]
        }"#;
        assert!(matches!(
            LedgerConfig::from_json(json),
            Err(ConfigError::InvalidRoute { remote: 9, .. })
        ));
    }

    #[test]
    fn malformed_json_rejected() {
        assert!(matches!(
            LedgerConfig::from_json("{ not json"),
            Err(ConfigError::Malformed(_))
        ));
    }
}
