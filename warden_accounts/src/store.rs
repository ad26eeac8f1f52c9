//! Account storage.
//!
//! The ledger is generic over [`AccountStore`] so the same engine can run
//! on the in-memory store used here or on a persistent adapter offering
//! the same per-key atomic read-modify-write primitive.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

use warden_core::error::AccountError;
use warden_core::id::AccountId;

use crate::account::Account;

/// Storage backend for account records.
///
/// `update_with` is the atomicity primitive everything else is built on:
/// the closure runs while the record is exclusively held, so a balance
/// check and the following mutation cannot interleave with a concurrent
/// writer on the same account.
pub trait AccountStore: Send + Sync {
    /// Insert a new account, atomically reserving its label.
    fn insert(&self, account: Account) -> Result<(), AccountError>;

    /// Fetch an account by id.
    fn get(&self, id: &AccountId) -> Result<Account, AccountError>;

    /// Fetch an account by its unique label.
    fn get_by_label(&self, label: &str) -> Result<Account, AccountError>;

    /// Atomically read-modify-write one account. The mutation is only
    /// applied if the closure returns `Ok`; the updated record is
    /// returned.
    fn update_with(
        &self,
        id: &AccountId,
        mutate: &mut dyn FnMut(&mut Account) -> Result<(), AccountError>,
    ) -> Result<Account, AccountError>;

    /// Remove an account, releasing its label.
    fn remove(&self, id: &AccountId) -> Result<Account, AccountError>;

    /// All accounts in creation order.
    fn list(&self) -> Vec<Account>;
}

/// An in-memory account store.
#[derive(Clone, Default)]
pub struct InMemoryAccountStore {
    /// The accounts, indexed by id.
    accounts: Arc<DashMap<AccountId, Account>>,

    /// Label index, for label lookups and uniqueness.
    labels: Arc<DashMap<String, AccountId>>,

    /// Ids in creation order.
    order: Arc<Mutex<Vec<AccountId>>>,
}

impl InMemoryAccountStore {
    /// Create a new in-memory account store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccountStore for InMemoryAccountStore {
    fn insert(&self, account: Account) -> Result<(), AccountError> {
        // Reserve the label first so two concurrent creates with the same
        // label cannot both pass the uniqueness check.
        if let Some(label) = &account.label {
            match self.labels.entry(label.clone()) {
                Entry::Occupied(_) => {
                    return Err(AccountError::LabelExists(label.clone()));
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(account.id);
                }
            }
        }

        match self.accounts.entry(account.id) {
            Entry::Occupied(_) => {
                // Roll back the label reservation; the caller retries with
                // a fresh id.
                if let Some(label) = &account.label {
                    self.labels.remove(label);
                }
                Err(AccountError::IdCollision)
            }
            Entry::Vacant(vacant) => {
                let id = account.id;
                vacant.insert(account);
                self.order.lock().push(id);
                Ok(())
            }
        }
    }

    fn get(&self, id: &AccountId) -> Result<Account, AccountError> {
        self.accounts
            .get(id)
            .map(|entry| entry.clone())
            .ok_or(AccountError::NotFound)
    }

    fn get_by_label(&self, label: &str) -> Result<Account, AccountError> {
        let id = self
            .labels
            .get(label)
            .map(|entry| *entry.value())
            .ok_or(AccountError::NotFound)?;
        self.get(&id)
    }

    fn update_with(
        &self,
        id: &AccountId,
        mutate: &mut dyn FnMut(&mut Account) -> Result<(), AccountError>,
    ) -> Result<Account, AccountError> {
        // get_mut holds the shard write lock for the duration of the
        // closure, serializing all mutations of this account. Mutations
        // run on a scratch copy committed only on success.
        let mut entry = self.accounts.get_mut(id).ok_or(AccountError::NotFound)?;
        let mut scratch = entry.value().clone();
        mutate(&mut scratch)?;
        *entry.value_mut() = scratch;
        Ok(entry.clone())
    }

    fn remove(&self, id: &AccountId) -> Result<Account, AccountError> {
        let (_, account) = self.accounts.remove(id).ok_or(AccountError::NotFound)?;
        if let Some(label) = &account.label {
            self.labels.remove(label);
        }
        self.order.lock().retain(|entry| entry != id);
        Ok(account)
    }

    fn list(&self) -> Vec<Account> {
        let order = self.order.lock();
        order
            .iter()
            .filter_map(|id| self.accounts.get(id).map(|entry| entry.clone()))
            .collect()
    }
}
