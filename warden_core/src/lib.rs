//! # Warden Core
//!
//! Core types, errors and traits for the warden authorization daemon.
//!
//! This crate defines the fundamental interfaces shared by the other warden
//! crates:
//!
//! - The typed error hierarchy returned by every warden operation
//! - Strongly-typed account and session identifiers
//! - The clock abstraction used for all expiry checks
//! - The macaroon recipe model and the external signer/verifier traits
//! - Session state and type enums shared across the crate boundary
//!
//! The `warden_core` crate is deliberately minimal and focuses on defining
//! interfaces rather than implementations. Concrete implementations of these
//! traits are provided by the other crates in the warden workspace.

pub mod clock;
pub mod error;
pub mod id;
pub mod macaroon;
pub mod types;

// Re-export key items for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AccountError, AuthError, Error, RuleError, SessionError, SignerError};
pub use id::{AccountId, SessionId};
pub use macaroon::{
    MacaroonIdentity, MacaroonRecipe, MacaroonSigner, MintedMacaroon, Permission,
    READONLY_URI_KEYWORD,
};
pub use types::{CallKind, PrivacyFlags, SessionState, SessionType};

/// A type alias for Result with our error types
pub type Result<T, E = error::Error> = std::result::Result<T, E>;
