//! # Capability Map
//!
//! Privileged operations check an explicit map from address to granted
//! roles at their entry point. There is exactly one administrator (the
//! owner); only the owner grants or revokes.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Address;

/// A capability that can be granted to an address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// May call `mint` and `burn` on the token. Held by the vault and the
    /// bridge, never by end users.
    MintAndBurn,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::MintAndBurn => write!(f, "MINT_AND_BURN"),
        }
    }
}

/// Authorization failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoleError {
    /// The caller is not the owner.
    #[error("unauthorized: {caller} is not the owner")]
    NotOwner {
        /// Who tried.
        caller: Address,
    },

    /// The caller lacks a required role.
    #[error("unauthorized: {caller} lacks role {role}")]
    MissingRole {
        /// Who tried.
        caller: Address,
        /// What they needed.
        role: Role,
    },
}

/// Owner plus role grants.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoleRegistry {
    owner: Address,
    grants: HashMap<Address, HashSet<Role>>,
}

impl RoleRegistry {
    /// Creates a registry administered by `owner`, with no grants.
    pub fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            grants: HashMap::new(),
        }
    }

    /// The current owner.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Fails with [`RoleError::NotOwner`] unless `caller` is the owner.
    pub fn require_owner(&self, caller: &str) -> Result<(), RoleError> {
        if caller == self.owner {
            Ok(())
        } else {
            Err(RoleError::NotOwner {
                caller: caller.to_string(),
            })
        }
    }

    /// Fails with [`RoleError::MissingRole`] unless `caller` holds `role`.
    pub fn require(&self, role: Role, caller: &str) -> Result<(), RoleError> {
        if self.has_role(role, caller) {
            Ok(())
        } else {
            Err(RoleError::MissingRole {
                caller: caller.to_string(),
                role,
            })
        }
    }

    /// Returns `true` if `address` holds `role`.
    pub fn has_role(&self, role: Role, address: &str) -> bool {
        self.grants
            .get(address)
            .map(|roles| roles.contains(&role))
            .unwrap_or(false)
    }

    /// Grants `role` to `grantee`. Returns `false` if it was already held.
    pub fn grant(&mut self, caller: &str, role: Role, grantee: &str) -> Result<bool, RoleError> {
        self.require_owner(caller)?;
        Ok(self
            .grants
            .entry(grantee.to_string())
            .or_default()
            .insert(role))
    }

    /// Revokes `role` from `grantee`. Returns `false` if it wasn't held.
    pub fn revoke(&mut self, caller: &str, role: Role, grantee: &str) -> Result<bool, RoleError> {
        self.require_owner(caller)?;
        Ok(self
            .grants
            .get_mut(grantee)
            .map(|roles| roles.remove(&role))
            .unwrap_or(false))
    }
}
