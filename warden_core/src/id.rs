//! Strongly-typed identifiers for the warden system.
//!
//! This module provides the identifier types used throughout the system,
//! ensuring type safety and clear semantics. Account ids are short random
//! byte strings generated at creation time; session ids are derived
//! deterministically from the macaroon root key, so re-deriving from the
//! same key always yields the same id.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AccountError;

/// Length of an account id in bytes.
pub const ACCOUNT_ID_LEN: usize = 8;

/// Length of a session id in bytes.
pub const SESSION_ID_LEN: usize = 32;

/// Identifier for a ledger account.
///
/// Generated randomly at account creation and immutable thereafter.
/// Rendered as a fixed-width hex string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId([u8; ACCOUNT_ID_LEN]);

impl AccountId {
    /// Create a new random account id.
    pub fn new_random() -> Self {
        let mut bytes = [0u8; ACCOUNT_ID_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create an account id from raw bytes.
    pub fn from_bytes(bytes: [u8; ACCOUNT_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes of this id.
    pub fn as_bytes(&self) -> &[u8; ACCOUNT_ID_LEN] {
        &self.0
    }

    /// Returns true if the given string would parse as an account id:
    /// valid hex of exactly the expected byte length. Used by boundary
    /// layers to disambiguate positional id-or-label arguments.
    pub fn is_valid_encoding(s: &str) -> bool {
        matches!(hex::decode(s), Ok(bytes) if bytes.len() == ACCOUNT_ID_LEN)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for AccountId {
    type Err = AccountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| AccountError::MalformedId(s.to_string()))?;
        let bytes: [u8; ACCOUNT_ID_LEN] = bytes
            .try_into()
            .map_err(|_| AccountError::MalformedId(s.to_string()))?;
        Ok(Self(bytes))
    }
}

/// Identifier for a session.
///
/// A session id is the SHA-256 digest of the session's macaroon root key.
/// Two sessions minted from the same root key collide by design; any other
/// input produces a different id with overwhelming probability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId([u8; SESSION_ID_LEN]);

impl SessionId {
    /// Derive the session id from the macaroon root key.
    pub fn derive(root_key: &[u8]) -> Self {
        let digest = Sha256::digest(root_key);
        Self(digest.into())
    }

    /// Create a session id from raw bytes.
    pub fn from_bytes(bytes: [u8; SESSION_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes of this id.
    pub fn as_bytes(&self) -> &[u8; SESSION_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
