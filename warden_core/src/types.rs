//! Shared session data types.
//!
//! This module defines the session state machine states, session types and
//! small shared value types used across the warden crates.

use serde::{Deserialize, Serialize};

/// The lifecycle state of a session.
///
/// Legal transitions are `Reserved -> Created -> InUse -> Revoked`, with
/// `Reserved | Created | InUse -> Revoked` and
/// `Reserved | Created | InUse -> Expired`. `Revoked` and `Expired` are
/// terminal; a session never leaves a terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// A session row exists but is not yet backed by an active macaroon
    /// session, e.g. while awaiting the remote pairing handshake.
    Reserved,

    /// The macaroon recipe has been minted and the session is usable but
    /// has never been authenticated against.
    Created,

    /// At least one successful authenticated call has been made under this
    /// session's macaroon.
    InUse,

    /// Explicitly terminated by the owner. Terminal.
    Revoked,

    /// Past its expiry without explicit revocation. Terminal. The
    /// transition is evaluated lazily at read/authorization time.
    Expired,
}

impl SessionState {
    /// Returns true for the terminal states `Revoked` and `Expired`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Revoked | SessionState::Expired)
    }

    /// Returns true if a transition from `self` to `to` is legal.
    pub fn can_transition_to(&self, to: SessionState) -> bool {
        use SessionState::*;
        match (self, to) {
            (Reserved, Created) => true,
            (Reserved | Created, InUse) => true,
            (Reserved | Created | InUse, Revoked) => true,
            (Reserved | Created | InUse, Expired) => true,
            _ => false,
        }
    }
}

/// The type of a session, which determines how its macaroon recipe is
/// constructed and which rule set applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionType {
    /// A macaroon restricted to the read-only API surface.
    ReadOnlyMacaroon,

    /// A macaroon carrying the full admin permission set.
    AdminMacaroon,

    /// A macaroon with caller-supplied permissions.
    CustomMacaroon,

    /// A password-authenticated UI session; read-only surface.
    UiPassword,

    /// An autonomous-agent session carrying per-feature rule sets.
    Autopilot,

    /// A macaroon locked to a ledger account.
    AccountMacaroon,
}

/// Classification of a call for rate limiting purposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallKind {
    /// A read-only call.
    Read,

    /// A state-changing call.
    Write,
}

/// Bitmask controlling data redaction applied to outbound information for
/// a session. Opaque to this core beyond pass-through.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacyFlags(pub u64);

impl PrivacyFlags {
    /// No redaction.
    pub const NONE: PrivacyFlags = PrivacyFlags(0);

    /// Returns true if the given flag bits are all set.
    pub fn contains(&self, bits: u64) -> bool {
        self.0 & bits == bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(SessionState::Revoked.is_terminal());
        assert!(SessionState::Expired.is_terminal());
        assert!(!SessionState::Created.is_terminal());
        assert!(!SessionState::Reserved.is_terminal());
        assert!(!SessionState::InUse.is_terminal());
    }

    #[test]
    fn test_no_resurrection() {
        for terminal in [SessionState::Revoked, SessionState::Expired] {
            for target in [
                SessionState::Reserved,
                SessionState::Created,
                SessionState::InUse,
                SessionState::Revoked,
                SessionState::Expired,
            ] {
                assert!(
                    !terminal.can_transition_to(target),
                    "{terminal:?} must not transition to {target:?}"
                );
            }
        }
    }

    #[test]
    fn test_forward_transitions() {
        assert!(SessionState::Reserved.can_transition_to(SessionState::Created));
        assert!(SessionState::Created.can_transition_to(SessionState::InUse));
        assert!(SessionState::InUse.can_transition_to(SessionState::Revoked));
        assert!(SessionState::Created.can_transition_to(SessionState::Expired));
        assert!(!SessionState::InUse.can_transition_to(SessionState::Created));
    }
}
