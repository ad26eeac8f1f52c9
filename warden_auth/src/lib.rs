//! Authorization engine facade for the warden daemon.
//!
//! [`AuthorizationEngine`] is the single entry point the request path
//! talks to: given the identity extracted from a presented macaroon and
//! the requested entity/action, it resolves the session or account,
//! checks recipe permissions, evaluates any applicable rules, applies
//! balance debits atomically and records session usage.

pub mod engine;

pub use engine::{AuthRequest, AuthorizationEngine, Decision};
