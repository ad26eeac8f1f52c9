//! Error types for the warden authorization core.
//!
//! This module defines a comprehensive error hierarchy that enables
//! precise error handling throughout the system. Every condition is
//! recoverable by the caller; none is fatal to the process, and the
//! specific kind always reaches the caller so that "denied by policy"
//! and "insufficient funds" remain programmatically distinguishable.

use crate::id::AccountId;
use crate::types::{SessionState, SessionType};
use thiserror::Error;

/// Root error type for the warden system.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Account error: {0}")]
    Account(#[from] AccountError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    #[error("Authorization error: {0}")]
    Auth(#[from] AuthError),

    #[error("Signer error: {0}")]
    Signer(#[from] SignerError),
}

/// Errors related to account ledger operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountError {
    #[error("Account not found")]
    NotFound,

    #[error("An account with the label {0} already exists")]
    LabelExists(String),

    #[error("Generated account id collides with an existing account")]
    IdCollision,

    #[error("Invalid expiration: {0}")]
    InvalidExpiration(i64),

    #[error("Insufficient balance: {requested} requested but only {balance} available")]
    InsufficientBalance { balance: i64, requested: i64 },

    #[error("Account expired at {0}")]
    Expired(i64),

    #[error("Account {0} is in use by an active session")]
    InUse(AccountId),

    #[error("Amount must not be negative, got {0}")]
    NegativeAmount(i64),

    #[error("Either the account ID or the label must be specified, not both")]
    IdentifierConflict,

    #[error("Either the account ID or the label must be specified")]
    IdentifierMissing,

    #[error("Malformed account id: {0}")]
    MalformedId(String),
}

/// Errors related to session store operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session not found")]
    NotFound,

    #[error("A session derived from this root key already exists")]
    AlreadyExists,

    #[error("A non-terminal session with the label {0} already exists")]
    DuplicateLabel(String),

    #[error("Account macaroon sessions require an account id")]
    AccountRequired,

    #[error("Referenced account {0} does not exist")]
    AccountNotFound(AccountId),

    #[error("Only account macaroon sessions may reference an account")]
    AccountNotAllowed,

    #[error("Feature rules are only allowed on autopilot sessions")]
    RulesNotAllowed,

    #[error("Session is in terminal state {0:?}")]
    Terminal(SessionState),

    #[error("Invalid session state transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },

    #[error("Custom permissions are not allowed for session type {0:?}")]
    CustomPermissionsNotAllowed(SessionType),

    #[error("Invalid session expiry: {0}")]
    InvalidExpiry(i64),
}

/// Errors related to rule evaluation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("Rate limit {name} exceeded: {limit} calls per {window_hours}h window")]
    RateLimitExceeded {
        name: String,
        limit: u32,
        window_hours: u32,
    },

    #[error("Budget {name} exceeded: {spent} spent, {requested} requested, {max} maximum")]
    BudgetExceeded {
        name: String,
        spent: u64,
        requested: u64,
        max: u64,
    },

    #[error("Policy violation by rule {name}: {reason}")]
    PolicyViolation { name: String, reason: String },

    #[error("Invalid configuration for rule {name}: {reason}")]
    InvalidConfiguration { name: String, reason: String },

    #[error("History limit {name} exceeded")]
    HistoryLimitExceeded { name: String },
}

/// Errors related to authorization decisions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("No session or account matches the presented macaroon identity")]
    UnknownIdentity,

    #[error("Permission denied for {entity}/{action}")]
    PermissionDenied { entity: String, action: String },
}

/// Errors surfaced by the external macaroon signer/verifier.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignerError {
    #[error("Macaroon signing failed: {0}")]
    SigningFailed(String),

    #[error("Macaroon verification failed: {0}")]
    VerificationFailed(String),
}

impl Error {
    /// Returns true if this error is a permission denial rather than a
    /// resource or configuration problem.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Error::Auth(AuthError::PermissionDenied { .. })
                | Error::Rule(RuleError::RateLimitExceeded { .. })
                | Error::Rule(RuleError::BudgetExceeded { .. })
                | Error::Rule(RuleError::PolicyViolation { .. })
                | Error::Rule(RuleError::HistoryLimitExceeded { .. })
        )
    }
}
