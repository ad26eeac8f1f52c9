//! The account ledger engine.
//!
//! This module provides [`AccountLedger`], the unit of financial truth:
//! it owns account creation, credits, debits and removal, and guarantees
//! that no sequence of operations ever observes a negative balance.

use std::sync::Arc;

use rand::RngCore;
use tracing::{debug, info};

use warden_core::clock::Clock;
use warden_core::error::AccountError;
use warden_core::id::AccountId;
use warden_core::macaroon::{MacaroonRecipe, MacaroonSigner, MintedMacaroon, Permission};
use warden_core::Result;

use crate::account::{Account, AccountIdentifier};
use crate::store::AccountStore;

/// Number of times to retry account id generation on a collision.
const ID_GENERATION_ATTEMPTS: usize = 10;

/// The permission recipe baked into every account macaroon: the off-chain
/// spending surface, locked to the account by a caveat.
fn account_recipe(id: &AccountId) -> MacaroonRecipe {
    MacaroonRecipe::new(
        vec![
            Permission::new("info", "read"),
            Permission::new("invoices", "read"),
            Permission::new("invoices", "write"),
            Permission::new("offchain", "read"),
            Permission::new("offchain", "write"),
        ],
        vec![format!("account {id}")],
    )
}

/// The account ledger.
///
/// Generic over the storage backend; all balance checks and mutations go
/// through the store's atomic read-modify-write primitive, so concurrent
/// callers on the same account are serialized.
pub struct AccountLedger<S> {
    /// The account store.
    store: S,

    /// Clock used for expiration checks.
    clock: Arc<dyn Clock>,

    /// The external macaroon signer.
    signer: Arc<dyn MacaroonSigner>,
}

impl<S: AccountStore> AccountLedger<S> {
    /// Create a new ledger over the given store.
    pub fn new(store: S, clock: Arc<dyn Clock>, signer: Arc<dyn MacaroonSigner>) -> Self {
        Self {
            store,
            clock,
            signer,
        }
    }

    /// Create a new account with an initial balance, an expiration (`0`
    /// means never) and an optional unique label.
    ///
    /// Mints the account macaroon through the external signer; if minting
    /// fails, nothing is persisted. Returns the account together with the
    /// minted macaroon so the caller can hand it to the bearer.
    pub fn create(
        &self,
        balance: i64,
        expiration: i64,
        label: Option<String>,
    ) -> Result<(Account, MintedMacaroon)> {
        if balance < 0 {
            return Err(AccountError::NegativeAmount(balance).into());
        }
        if expiration < 0 {
            return Err(AccountError::InvalidExpiration(expiration).into());
        }

        let now = self.clock.now_unix();
        for _ in 0..ID_GENERATION_ATTEMPTS {
            let id = AccountId::new_random();

            let mut root_key = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut root_key);

            // Mint before persisting so a signer failure leaves no trace.
            let minted = self.signer.mint(&root_key, &account_recipe(&id))?;

            let account = Account {
                id,
                label: label.clone(),
                balance,
                initial_balance: balance,
                expiration,
                created_at: now,
                macaroon_association: vec![minted.macaroon.clone()],
            };

            match self.store.insert(account.clone()) {
                Ok(()) => {
                    info!(%id, balance, expiration, "created account");
                    return Ok((account, minted));
                }
                Err(AccountError::IdCollision) => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Err(AccountError::IdCollision.into())
    }

    /// Resolve a typed identifier to an account id.
    fn resolve(&self, identifier: &AccountIdentifier) -> Result<AccountId> {
        match identifier {
            AccountIdentifier::Id(id) => Ok(*id),
            AccountIdentifier::Label(label) => {
                Ok(self.store.get_by_label(label).map(|account| account.id)?)
            }
        }
    }

    /// Increase an account's balance by the given non-negative amount.
    /// No upper bound is enforced.
    pub fn credit(&self, identifier: &AccountIdentifier, amount: i64) -> Result<Account> {
        if amount < 0 {
            return Err(AccountError::NegativeAmount(amount).into());
        }
        let id = self.resolve(identifier)?;
        let account = self.store.update_with(&id, &mut |account| {
            account.balance = account.balance.saturating_add(amount);
            Ok(())
        })?;
        debug!(%id, amount, balance = account.balance, "credited account");
        Ok(account)
    }

    /// Decrease an account's balance by the given non-negative amount.
    ///
    /// Fails with `InsufficientBalance` if the amount exceeds the current
    /// balance, and with `Expired` if the account is past a non-zero
    /// expiration. The check and the mutation are atomic with respect to
    /// concurrent callers on the same account.
    pub fn debit(&self, identifier: &AccountIdentifier, amount: i64) -> Result<Account> {
        if amount < 0 {
            return Err(AccountError::NegativeAmount(amount).into());
        }
        let id = self.resolve(identifier)?;
        let now = self.clock.now_unix();
        let account = self.store.update_with(&id, &mut |account| {
            if account.is_expired(now) {
                return Err(AccountError::Expired(account.expiration));
            }
            if amount > account.balance {
                return Err(AccountError::InsufficientBalance {
                    balance: account.balance,
                    requested: amount,
                });
            }
            account.balance -= amount;
            Ok(())
        })?;
        debug!(%id, amount, balance = account.balance, "debited account");
        Ok(account)
    }

    /// Overwrite the balance and/or expiration of an account. Fields left
    /// as `None` keep their current value. A new expiration of `0` means
    /// the account never expires.
    pub fn update(
        &self,
        identifier: &AccountIdentifier,
        new_balance: Option<i64>,
        new_expiration: Option<i64>,
    ) -> Result<Account> {
        if let Some(balance) = new_balance {
            if balance < 0 {
                return Err(AccountError::NegativeAmount(balance).into());
            }
        }
        if let Some(expiration) = new_expiration {
            if expiration < 0 {
                return Err(AccountError::InvalidExpiration(expiration).into());
            }
        }

        let id = self.resolve(identifier)?;
        let account = self.store.update_with(&id, &mut |account| {
            if let Some(balance) = new_balance {
                account.balance = balance;
            }
            if let Some(expiration) = new_expiration {
                account.expiration = expiration;
            }
            Ok(())
        })?;
        debug!(%id, ?new_balance, ?new_expiration, "updated account");
        Ok(account)
    }

    /// Associate a further macaroon with an existing account. Multiple
    /// macaroons may share one account.
    pub fn register_macaroon(
        &self,
        identifier: &AccountIdentifier,
        macaroon: Vec<u8>,
    ) -> Result<Account> {
        let id = self.resolve(identifier)?;
        Ok(self.store.update_with(&id, &mut |account| {
            account.macaroon_association.push(macaroon.clone());
            Ok(())
        })?)
    }

    /// Fetch a single account. Expired accounts remain queryable.
    pub fn lookup(&self, identifier: &AccountIdentifier) -> Result<Account> {
        let id = self.resolve(identifier)?;
        Ok(self.store.get(&id)?)
    }

    /// Remove an account.
    ///
    /// This is the raw removal; the check that no active session still
    /// references the account is enforced by the authorization engine,
    /// which is the only layer that can see both stores.
    pub fn remove(&self, identifier: &AccountIdentifier) -> Result<Account> {
        let id = self.resolve(identifier)?;
        let account = self.store.remove(&id)?;
        info!(%id, "removed account");
        Ok(account)
    }

    /// All accounts in creation order.
    pub fn list(&self) -> Vec<Account> {
        self.store.list()
    }
}
