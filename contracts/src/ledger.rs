//! One ledger's contracts, wired together from a [`LedgerConfig`].

use std::sync::Arc;

use accrue_protocol::clock::Clock;
use accrue_protocol::config::{ledger_name, ConfigError, LedgerConfig, LedgerId};
use accrue_protocol::metrics::{BridgeMetrics, MetricsError};
use accrue_protocol::roles::Role;
use accrue_protocol::transport::{DeliveryEndpoint, TransportChannel};
use thiserror::Error;
use tracing::info;

use crate::bridge::{BridgeError, CrossLedgerBridge};
use crate::custody::Custody;
use crate::rebase_token::{RebaseToken, SharedToken, TokenError};
use crate::vault::Vault;

/// Errors raised while deploying a ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The config failed validation.
    #[error("invalid ledger config: {0}")]
    Config(#[from] ConfigError),

    /// Granting roles failed.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Applying a route failed.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// Metric registration failed.
    #[error("metrics: {0}")]
    Metrics(#[from] MetricsError),
}

/// Token, vault and bridge for one ledger.
#[derive(Debug)]
pub struct Ledger {
    config: LedgerConfig,
    token: SharedToken,
    vault: Vault,
    bridge: Arc<CrossLedgerBridge>,
}

impl Ledger {
    /// Deploys the token, grants the vault and bridge their mint-and-burn
    /// role, and applies every configured route.
    ///
    /// The bridge is not registered with any transport; do that with
    /// [`endpoint`](Self::endpoint).
    pub fn deploy(
        config: LedgerConfig,
        clock: Arc<dyn Clock>,
        custody: Arc<dyn Custody>,
        transport: Arc<dyn TransportChannel>,
    ) -> Result<Self, LedgerError> {
        config.validate()?;

        let mut token = RebaseToken::new(
            &config.token_address,
            &config.owner,
            config.initial_global_rate,
            clock,
        );
        token.grant_role(&config.owner, Role::MintAndBurn, &config.vault_address)?;
        token.grant_role(&config.owner, Role::MintAndBurn, &config.bridge_address)?;
        let token = token.into_shared();

        let vault = Vault::new(&config.vault_address, token.clone(), custody);
        let bridge = Arc::new(CrossLedgerBridge::new(
            config.ledger_id,
            &config.bridge_address,
            token.clone(),
            transport,
            BridgeMetrics::new(config.ledger_id)?,
        ));
        for route in &config.routes {
            bridge.apply_route(&config.owner, route.remote, route.limits)?;
        }

        info!(
            ledger = %ledger_name(config.ledger_id),
            token = %config.token_address,
            routes = config.routes.len(),
            rate = config.initial_global_rate,
            "ledger deployed"
        );
        Ok(Self {
            config,
            token,
            vault,
            bridge,
        })
    }

    /// This ledger's id.
    pub fn ledger_id(&self) -> LedgerId {
        self.config.ledger_id
    }

    /// The config it was deployed from.
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// The administrator.
    pub fn owner(&self) -> &str {
        &self.config.owner
    }

    /// The shared token.
    pub fn token(&self) -> &SharedToken {
        &self.token
    }

    /// The vault.
    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    /// The bridge.
    pub fn bridge(&self) -> &Arc<CrossLedgerBridge> {
        &self.bridge
    }

    /// The bridge as a delivery callback, for registering with a transport.
    pub fn endpoint(&self) -> Arc<dyn DeliveryEndpoint> {
        self.bridge.clone()
    }

    /// Interest-inclusive balance of `user`.
    pub fn balance_of(&self, user: &str) -> Result<u64, TokenError> {
        self.token.lock().balance_of(user)
    }
}
