//! # Rebase Token Contract
//!
//! The interest-bearing claim token. Balances grow continuously at each
//! account's locked rate; principal is only brought up to date lazily,
//! when something touches the account.
//!
//! ## Settlement Rule
//!
//! Every mutating operation settles each account it touches *before*
//! doing anything else. Settlement is computed on copies and committed
//! together with the operation, so a failed transfer never leaves one
//! side settled and the other not.
//!
//! ## Rate Assignment
//!
//! - `mint` overwrites the recipient's locked rate with whatever the
//!   caller passes. Callers own that contract: the vault passes the global
//!   rate, the bridge passes the rate carried from the source ledger.
//! - `transfer` into an empty account copies the sender's rate. Transfers
//!   into a funded account leave its rate alone.
//! - The global rate only ever goes down.

use std::collections::HashMap;
use std::sync::Arc;

use accrue_protocol::clock::Clock;
use accrue_protocol::config::Address;
use accrue_protocol::events::{EventLog, EventRecord, LedgerEvent};
use accrue_protocol::interest::{AccountRecord, InterestError};
use accrue_protocol::roles::{Role, RoleError, RoleRegistry};
use accrue_protocol::Amount;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during token operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// The proposed global rate is not strictly below the current one.
    #[error("rate increase rejected: current {current}, proposed {proposed} (rate can only decrease)")]
    RateIncreaseRejected {
        /// Global rate in force.
        current: u64,
        /// Rejected proposal.
        proposed: u64,
    },

    /// Burn or transfer exceeds the settled balance.
    #[error("insufficient balance: {account} has {available}, requested {requested}")]
    InsufficientBalance {
        /// Account being debited.
        account: Address,
        /// Settled balance.
        available: u64,
        /// Amount requested.
        requested: u64,
    },

    /// Delegated transfer exceeds the approved allowance.
    #[error("allowance exceeded: {spender} may move {allowance} for {owner}, requested {requested}")]
    AllowanceExceeded {
        /// Token holder.
        owner: Address,
        /// Delegate.
        spender: Address,
        /// Remaining allowance.
        allowance: u64,
        /// Amount requested.
        requested: u64,
    },

    /// Caller lacks the required capability.
    #[error(transparent)]
    Unauthorized(#[from] RoleError),

    /// Accrual math failed (clock regression or overflow).
    #[error("interest error: {0}")]
    Interest(#[from] InterestError),

    /// Total principal would exceed `u64::MAX`.
    #[error("supply overflow: adding {amount} to total principal {total}")]
    SupplyOverflow {
        /// Current total principal.
        total: u64,
        /// Amount that didn't fit.
        amount: u64,
    },

    /// Empty address given where an account is required.
    #[error("empty account address")]
    ZeroAddress,
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// Snapshot of the parts of the token a compound operation may touch.
///
/// The vault and bridge take one before burning, and restore it if the
/// second half (base-asset release, transport send) fails.
#[derive(Clone, Debug)]
pub(crate) struct Checkpoint {
    accounts: Vec<(Address, Option<AccountRecord>)>,
    total_principal: u64,
    events_len: usize,
}

// ---------------------------------------------------------------------------
// RebaseToken
// ---------------------------------------------------------------------------

/// One ledger's rebase token. Wrap in [`SharedToken`] to share between the
/// vault and the bridge; the mutex serializes every mutation on the ledger.
#[derive(Debug)]
pub struct RebaseToken {
    address: Address,
    clock: Arc<dyn Clock>,
    global_rate: u64,
    accounts: HashMap<Address, AccountRecord>,
    allowances: HashMap<(Address, Address), u64>,
    total_principal: u64,
    roles: RoleRegistry,
    events: EventLog,
}

/// A token behind the ledger's serialization lock.
pub type SharedToken = Arc<Mutex<RebaseToken>>;

impl RebaseToken {
    /// Deploys a token at `address`, administered by `owner`, offering
    /// `initial_rate` to new depositors.
    pub fn new(address: &str, owner: &str, initial_rate: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            address: address.to_string(),
            clock,
            global_rate: initial_rate,
            accounts: HashMap::new(),
            allowances: HashMap::new(),
            total_principal: 0,
            roles: RoleRegistry::new(owner),
            events: EventLog::new(),
        }
    }

    /// Moves the token behind a shared lock.
    pub fn into_shared(self) -> SharedToken {
        Arc::new(Mutex::new(self))
    }

    /// The token's own address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Current ledger time.
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    // -----------------------------------------------------------------------
    // Administration
    // -----------------------------------------------------------------------

    /// Lowers the global rate. Owner only; must strictly decrease.
    ///
    /// # Errors
    ///
    /// [`TokenError::Unauthorized`] if `caller` is not the owner,
    /// [`TokenError::RateIncreaseRejected`] if `new_rate >= global_rate`.
    pub fn set_global_rate(&mut self, caller: &str, new_rate: u64) -> Result<(), TokenError> {
        self.roles.require_owner(caller)?;
        if new_rate >= self.global_rate {
            warn!(
                current = self.global_rate,
                proposed = new_rate,
                "global rate change rejected"
            );
            return Err(TokenError::RateIncreaseRejected {
                current: self.global_rate,
                proposed: new_rate,
            });
        }
        self.global_rate = new_rate;
        self.events
            .record(self.clock.now(), LedgerEvent::RateChanged { new_rate });
        info!(token = %self.address, new_rate, "global rate lowered");
        Ok(())
    }

    /// Grants `role` to `grantee`. Owner only.
    pub fn grant_role(&mut self, caller: &str, role: Role, grantee: &str) -> Result<(), TokenError> {
        if self.roles.grant(caller, role, grantee)? {
            info!(token = %self.address, %role, grantee, "role granted");
        }
        Ok(())
    }

    /// Revokes `role` from `grantee`. Owner only.
    pub fn revoke_role(&mut self, caller: &str, role: Role, grantee: &str) -> Result<(), TokenError> {
        if self.roles.revoke(caller, role, grantee)? {
            info!(token = %self.address, %role, grantee, "role revoked");
        }
        Ok(())
    }

    /// Returns `true` if `address` holds `role`.
    pub fn has_role(&self, role: Role, address: &str) -> bool {
        self.roles.has_role(role, address)
    }

    /// The administrator.
    pub fn owner(&self) -> &str {
        self.roles.owner()
    }

    // -----------------------------------------------------------------------
    // Mint / burn
    // -----------------------------------------------------------------------

    /// Issues `amount` principal to `to` and locks it at `rate`.
    ///
    /// Settles `to` first so prior interest is crystallized at the old
    /// rate before the overwrite. Returns the new principal.
    ///
    /// # Errors
    ///
    /// [`TokenError::Unauthorized`] unless `caller` holds
    /// [`Role::MintAndBurn`]; [`TokenError::SupplyOverflow`] if the supply
    /// would overflow.
    pub fn mint(&mut self, caller: &str, to: &str, amount: u64, rate: u64) -> Result<u64, TokenError> {
        self.roles.require(Role::MintAndBurn, caller)?;
        require_address(to)?;
        let now = self.clock.now();

        let (mut record, interest) = self.settled(to, now)?;
        record.locked_rate = rate;
        record.principal = record
            .principal
            .checked_add(amount)
            .ok_or(TokenError::SupplyOverflow {
                total: record.principal,
                amount,
            })?;
        let total = self.grow_supply(&[interest, amount])?;

        self.accounts.insert(to.to_string(), record);
        self.total_principal = total;
        self.events.record(
            now,
            LedgerEvent::Minted {
                to: to.to_string(),
                amount,
                rate,
            },
        );
        debug!(caller, to, amount, rate, interest, "minted");
        Ok(record.principal)
    }

    /// Destroys principal held by `from`. `Amount::Full` burns the entire
    /// interest-inclusive balance. Returns the amount burned.
    ///
    /// # Errors
    ///
    /// [`TokenError::Unauthorized`] unless `caller` holds
    /// [`Role::MintAndBurn`]; [`TokenError::InsufficientBalance`] if the
    /// amount exceeds the settled balance.
    pub fn burn(&mut self, caller: &str, from: &str, amount: Amount) -> Result<u64, TokenError> {
        self.roles.require(Role::MintAndBurn, caller)?;
        let now = self.clock.now();

        let (mut record, interest) = self.settled(from, now)?;
        let value = amount.resolve(record.principal);
        if value > record.principal {
            return Err(TokenError::InsufficientBalance {
                account: from.to_string(),
                available: record.principal,
                requested: value,
            });
        }
        record.principal -= value;
        // Interest is minted first, then the burn comes out of the result.
        let total = self.grow_supply(&[interest])? - value;

        self.accounts.insert(from.to_string(), record);
        self.total_principal = total;
        self.events.record(
            now,
            LedgerEvent::Burned {
                from: from.to_string(),
                amount: value,
            },
        );
        debug!(caller, from, value, interest, "burned");
        Ok(value)
    }

    // -----------------------------------------------------------------------
    // Transfers
    // -----------------------------------------------------------------------

    /// Moves tokens from `from` to `to`. Returns the amount moved.
    ///
    /// An empty recipient inherits the sender's locked rate.
    pub fn transfer(&mut self, from: &str, to: &str, amount: Amount) -> Result<u64, TokenError> {
        self.move_tokens(None, from, to, amount)
    }

    /// Moves tokens on behalf of `from`, spending `spender`'s allowance.
    ///
    /// # Errors
    ///
    /// [`TokenError::AllowanceExceeded`] if the resolved amount exceeds
    /// the allowance, plus everything [`transfer`](Self::transfer) returns.
    pub fn transfer_from(
        &mut self,
        spender: &str,
        from: &str,
        to: &str,
        amount: Amount,
    ) -> Result<u64, TokenError> {
        self.move_tokens(Some(spender), from, to, amount)
    }

    /// Sets `spender`'s allowance over `owner`'s tokens.
    pub fn approve(&mut self, owner: &str, spender: &str, amount: u64) -> Result<(), TokenError> {
        require_address(owner)?;
        require_address(spender)?;
        self.allowances
            .insert((owner.to_string(), spender.to_string()), amount);
        Ok(())
    }

    /// Remaining allowance.
    pub fn allowance(&self, owner: &str, spender: &str) -> u64 {
        self.allowances
            .get(&(owner.to_string(), spender.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn move_tokens(
        &mut self,
        spender: Option<&str>,
        from: &str,
        to: &str,
        amount: Amount,
    ) -> Result<u64, TokenError> {
        require_address(from)?;
        require_address(to)?;
        let now = self.clock.now();

        let (mut sender, sender_interest) = self.settled(from, now)?;
        let value = amount.resolve(sender.principal);

        let allowance = match spender {
            Some(spender) => {
                let allowance = self.allowance(from, spender);
                if value > allowance {
                    return Err(TokenError::AllowanceExceeded {
                        owner: from.to_string(),
                        spender: spender.to_string(),
                        allowance,
                        requested: value,
                    });
                }
                Some((spender, allowance - value))
            }
            None => None,
        };

        if value > sender.principal {
            return Err(TokenError::InsufficientBalance {
                account: from.to_string(),
                available: sender.principal,
                requested: value,
            });
        }

        if from == to {
            let total = self.grow_supply(&[sender_interest])?;
            self.accounts.insert(from.to_string(), sender);
            self.total_principal = total;
        } else {
            let (mut recipient, recipient_interest) = self.settled(to, now)?;
            if recipient.is_empty() {
                recipient.locked_rate = sender.locked_rate;
            }
            sender.principal -= value;
            recipient.principal =
                recipient
                    .principal
                    .checked_add(value)
                    .ok_or(TokenError::SupplyOverflow {
                        total: recipient.principal,
                        amount: value,
                    })?;
            let total = self.grow_supply(&[sender_interest, recipient_interest])?;

            self.accounts.insert(from.to_string(), sender);
            self.accounts.insert(to.to_string(), recipient);
            self.total_principal = total;
        }

        if let Some((spender, remaining)) = allowance {
            self.allowances
                .insert((from.to_string(), spender.to_string()), remaining);
        }
        self.events.record(
            now,
            LedgerEvent::Transferred {
                from: from.to_string(),
                to: to.to_string(),
                amount: value,
            },
        );
        debug!(from, to, value, "transferred");
        Ok(value)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Interest-inclusive balance right now.
    pub fn balance_of(&self, user: &str) -> Result<u64, TokenError> {
        Ok(self.record(user).accrued_balance(self.clock.now())?)
    }

    /// Principal actually issued, without unsettled interest.
    pub fn principal_of(&self, user: &str) -> u64 {
        self.record(user).principal
    }

    /// The account's locked rate (0 for an account never funded).
    pub fn account_rate(&self, user: &str) -> u64 {
        self.record(user).locked_rate
    }

    /// The full account record.
    pub fn account(&self, user: &str) -> AccountRecord {
        self.record(user)
    }

    /// Rate offered to new depositors.
    pub fn global_rate(&self) -> u64 {
        self.global_rate
    }

    /// Sum of settled principal across all accounts.
    pub fn total_principal(&self) -> u64 {
        self.total_principal
    }

    /// Every event recorded so far, oldest first.
    pub fn events(&self) -> &[EventRecord] {
        self.events.records()
    }

    /// Takes the event log, leaving it empty.
    pub fn drain_events(&mut self) -> Vec<EventRecord> {
        self.events.drain()
    }

    // -----------------------------------------------------------------------
    // Crate-internal plumbing for compound operations
    // -----------------------------------------------------------------------

    pub(crate) fn record_event(&mut self, event: LedgerEvent) {
        let now = self.clock.now();
        self.events.record(now, event);
    }

    pub(crate) fn checkpoint(&self, users: &[&str]) -> Checkpoint {
        Checkpoint {
            accounts: users
                .iter()
                .map(|user| (user.to_string(), self.accounts.get(*user).copied()))
                .collect(),
            total_principal: self.total_principal,
            events_len: self.events.len(),
        }
    }

    pub(crate) fn restore(&mut self, checkpoint: Checkpoint) {
        for (user, record) in checkpoint.accounts {
            match record {
                Some(record) => self.accounts.insert(user, record),
                None => self.accounts.remove(&user),
            };
        }
        self.total_principal = checkpoint.total_principal;
        self.events.truncate(checkpoint.events_len);
    }

    fn record(&self, user: &str) -> AccountRecord {
        self.accounts.get(user).copied().unwrap_or_default()
    }

    /// A settled copy of `user`'s record plus the interest it crystallized.
    /// Nothing is written back.
    fn settled(&self, user: &str, now: u64) -> Result<(AccountRecord, u64), TokenError> {
        let mut record = self.record(user);
        let interest = record.settle(now)?;
        Ok((record, interest))
    }

    fn grow_supply(&self, additions: &[u64]) -> Result<u64, TokenError> {
        additions.iter().try_fold(self.total_principal, |total, &amount| {
            total
                .checked_add(amount)
                .ok_or(TokenError::SupplyOverflow { total, amount })
        })
    }
}

fn require_address(address: &str) -> Result<(), TokenError> {
    if address.is_empty() {
        Err(TokenError::ZeroAddress)
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
