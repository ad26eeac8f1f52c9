//! The session record and its state machine.

use serde::{Deserialize, Serialize};

use warden_core::error::SessionError;
use warden_core::id::{AccountId, SessionId};
use warden_core::macaroon::MacaroonRecipe;
use warden_core::types::{PrivacyFlags, SessionState, SessionType};
use warden_rules::FeatureRules;

/// A session: a revocable, expirable authorization context bound to one
/// macaroon lineage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Derived deterministically from the macaroon root key.
    pub id: SessionId,

    /// Equals `id` at creation; copied from the predecessor when a
    /// session is rotated, forming a lineage chain for audit continuity.
    pub group_id: SessionId,

    /// Human-readable name. Unique among non-terminal sessions.
    pub label: String,

    /// Current lifecycle state.
    pub state: SessionState,

    /// Determines recipe construction and which rule set applies.
    pub session_type: SessionType,

    /// Unix timestamp after which the session is unusable even if never
    /// explicitly revoked.
    pub expiry: i64,

    /// Unix timestamp of creation.
    pub created_at: i64,

    /// The root key the session macaroon was minted from.
    pub macaroon_root_key: Vec<u8>,

    /// The local static key identifying this session to the transport.
    pub local_public_key: Vec<u8>,

    /// Pairing secret material handed to the remote party.
    pub pairing_secret: Vec<u8>,

    /// The write-once permission recipe the macaroon was minted from.
    pub macaroon_recipe: MacaroonRecipe,

    /// The backing account, set iff the type is `AccountMacaroon`.
    pub account_id: Option<AccountId>,

    /// Per-feature rule sets, carried by `Autopilot` sessions.
    pub feature_rules: Option<FeatureRules>,

    /// Redaction bitmask, passed through to outbound data handling.
    pub privacy_flags: PrivacyFlags,

    /// Set exactly once, on the transition into `Revoked`.
    pub revoked_at: Option<i64>,

    /// Address of the macaroon server the remote party pairs against.
    pub macaroon_server_addr: String,

    /// Whether the session points at a development server.
    pub dev_server: bool,
}

impl Session {
    /// Returns true if the session is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Returns true if the session should be considered dead at `now`:
    /// either already terminal or past its expiry and merely not yet
    /// observed as such.
    pub fn is_dead(&self, now: i64) -> bool {
        self.is_terminal() || now >= self.expiry
    }

    /// Transition into a new state, enforcing the legal transition table.
    pub fn transition(&mut self, to: SessionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(to) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Apply the lazy expiry rule: a non-terminal session observed at or
    /// past its expiry becomes `Expired` from that point. Returns true if
    /// the state changed.
    pub fn apply_lazy_expiry(&mut self, now: i64) -> bool {
        if !self.is_terminal() && now >= self.expiry {
            // The transition table permits Expired from every
            // non-terminal state.
            self.state = SessionState::Expired;
            true
        } else {
            false
        }
    }
}
