//! Account ledger for the warden authorization daemon.
//!
//! An account is an off-chain balance ledger entry: the bearer of a
//! macaroon locked to an account can spend at most that account's balance
//! through the daemon, regardless of underlying payment liquidity. This
//! crate owns the account records, their balance invariants and the
//! atomicity guarantees around concurrent credits and debits.

pub mod account;
pub mod ledger;
pub mod store;

pub use account::{Account, AccountIdentifier};
pub use ledger::AccountLedger;
pub use store::{AccountStore, InMemoryAccountStore};
