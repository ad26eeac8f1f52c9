//! Account model and identifier resolution.

use serde::{Deserialize, Serialize};

use warden_core::error::AccountError;
use warden_core::id::AccountId;

/// A ledger account: an amount of the smallest currency unit that can be
/// spent through the daemon by bearers of macaroons locked to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique, immutable identifier generated at creation.
    pub id: AccountId,

    /// Optional unique human-readable label, immutable after creation.
    pub label: Option<String>,

    /// Current spendable balance. Never negative at rest.
    pub balance: i64,

    /// The balance the account was created with.
    pub initial_balance: i64,

    /// Unix timestamp after which the account can no longer be debited.
    /// `0` means the account never expires.
    pub expiration: i64,

    /// Unix timestamp of creation.
    pub created_at: i64,

    /// Opaque binding to the macaroons minted against this account's root
    /// key. Multiple macaroons may share one account.
    pub macaroon_association: Vec<Vec<u8>>,
}

impl Account {
    /// Returns true if the account is past a non-zero expiration at `now`.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expiration != 0 && now > self.expiration
    }
}

/// A typed reference to an account: either its id or its unique label.
///
/// The core requires callers to say which one they mean. The ambiguous
/// positional heuristic used by command-line boundaries lives in
/// [`AccountIdentifier::parse_positional`] and never leaks into ledger
/// operations themselves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountIdentifier {
    /// Reference by id.
    Id(AccountId),

    /// Reference by label.
    Label(String),
}

impl AccountIdentifier {
    /// Build an identifier from optional id and label parts, as supplied
    /// by flag-style callers. Exactly one part must be given.
    pub fn from_parts(
        id: Option<AccountId>,
        label: Option<String>,
    ) -> Result<Self, AccountError> {
        match (id, label) {
            (Some(_), Some(_)) => Err(AccountError::IdentifierConflict),
            (Some(id), None) => Ok(AccountIdentifier::Id(id)),
            (None, Some(label)) => Ok(AccountIdentifier::Label(label)),
            (None, None) => Err(AccountError::IdentifierMissing),
        }
    }

    /// Interpret a single positional value as an id or a label.
    ///
    /// The value is treated as an id only if it decodes as hex to exactly
    /// the expected id length; anything else is a label. This heuristic is
    /// ambiguous by construction and exists for boundary layers only.
    pub fn parse_positional(value: &str) -> Self {
        if AccountId::is_valid_encoding(value) {
            // Decoding cannot fail after the encoding check.
            match value.parse() {
                Ok(id) => AccountIdentifier::Id(id),
                Err(_) => AccountIdentifier::Label(value.to_string()),
            }
        } else {
            AccountIdentifier::Label(value.to_string())
        }
    }
}
