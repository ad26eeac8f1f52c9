//! Macaroon session store and state machine for the warden daemon.
//!
//! A session is a revocable, expirable authorization context bound to one
//! macaroon lineage. This crate owns the session records, the
//! `Reserved -> Created -> InUse -> Revoked/Expired` state machine, and
//! the lineage linkage used when a session's macaroon is rotated.
//!
//! Expiry is lazy: no background sweep exists. Every read path applies
//! the expiry rule before returning a session, and persists the
//! transition it observes.

pub mod recipe;
pub mod session;
pub mod store;

pub use session::Session;
pub use store::{InMemorySessionBackend, SessionBackend};

use std::sync::Arc;

use parking_lot::RwLock;
use rand::RngCore;
use tracing::{debug, info};

use warden_accounts::store::AccountStore;
use warden_core::clock::Clock;
use warden_core::error::SessionError;
use warden_core::id::{AccountId, SessionId};
use warden_core::macaroon::{MacaroonSigner, Permission};
use warden_core::types::{PrivacyFlags, SessionState, SessionType};
use warden_core::Result;
use warden_rules::{validate_feature_rules, FeatureRules};

/// Everything needed to create a new session.
#[derive(Clone, Debug)]
pub struct SessionParams {
    /// Human-readable name, unique among non-terminal sessions.
    pub label: String,

    /// The session type.
    pub session_type: SessionType,

    /// Unix timestamp after which the session expires.
    pub expiry: i64,

    /// Address of the macaroon server the remote party pairs against.
    pub macaroon_server_addr: String,

    /// Whether the session points at a development server.
    pub dev_server: bool,

    /// Extra permissions, only permitted for custom macaroon sessions.
    pub custom_permissions: Option<Vec<Permission>>,

    /// Backing account, required iff the type is `AccountMacaroon`.
    pub account_id: Option<AccountId>,

    /// Per-feature rule sets, only permitted for autopilot sessions.
    pub feature_rules: Option<FeatureRules>,

    /// Redaction bitmask, passed through.
    pub privacy_flags: PrivacyFlags,

    /// Start in `Reserved` instead of `Created`, for sessions whose
    /// remote pairing handshake has not completed yet.
    pub reserved: bool,
}

impl SessionParams {
    /// Parameters with every optional field empty.
    pub fn new(
        label: impl Into<String>,
        session_type: SessionType,
        expiry: i64,
        macaroon_server_addr: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            session_type,
            expiry,
            macaroon_server_addr: macaroon_server_addr.into(),
            dev_server: false,
            custom_permissions: None,
            account_id: None,
            feature_rules: None,
            privacy_flags: PrivacyFlags::NONE,
            reserved: false,
        }
    }
}

/// Observer notified when a session is revoked, so a connection-handling
/// component can tear down the session's live transport.
pub trait SessionTeardown: Send + Sync {
    /// Called after a session has transitioned into `Revoked`.
    fn session_revoked(&self, session: &Session);
}

/// The session store engine.
///
/// Generic over the session backend and the account store it consults
/// when a session is account-scoped.
pub struct SessionStore<B, S> {
    backend: B,
    accounts: S,
    clock: Arc<dyn Clock>,
    signer: Arc<dyn MacaroonSigner>,
    teardown: RwLock<Option<Arc<dyn SessionTeardown>>>,
}

impl<B: SessionBackend, S: AccountStore> SessionStore<B, S> {
    /// Create a new session store.
    pub fn new(
        backend: B,
        accounts: S,
        clock: Arc<dyn Clock>,
        signer: Arc<dyn MacaroonSigner>,
    ) -> Self {
        Self {
            backend,
            accounts,
            clock,
            signer,
            teardown: RwLock::new(None),
        }
    }

    /// Register the transport teardown observer.
    pub fn set_teardown(&self, teardown: Arc<dyn SessionTeardown>) {
        *self.teardown.write() = Some(teardown);
    }

    /// Create a new session.
    ///
    /// Builds the macaroon recipe from the session type (merging custom
    /// permissions for custom macaroons), mints the macaroon through the
    /// external signer, and persists the record. If the signer fails,
    /// nothing is persisted.
    pub fn add(&self, params: SessionParams) -> Result<Session> {
        self.create_session(params, None)
    }

    /// Create a session continuing a predecessor's lineage.
    ///
    /// The new session copies the predecessor's `group_id` and the
    /// predecessor is revoked once the new session exists.
    pub fn rotate(&self, predecessor: &SessionId, params: SessionParams) -> Result<Session> {
        let predecessor = self.refresh(predecessor)?;
        let session = self.create_session(params, Some(predecessor.group_id))?;
        // The predecessor may already be terminal; revoke is idempotent.
        self.revoke(&predecessor.local_public_key)?;
        Ok(session)
    }

    fn create_session(
        &self,
        params: SessionParams,
        group_id: Option<SessionId>,
    ) -> Result<Session> {
        let now = self.clock.now_unix();
        if params.expiry <= now {
            return Err(SessionError::InvalidExpiry(params.expiry).into());
        }

        match params.session_type {
            SessionType::AccountMacaroon => {
                let account_id = params.account_id.ok_or(SessionError::AccountRequired)?;
                if self.accounts.get(&account_id).is_err() {
                    return Err(SessionError::AccountNotFound(account_id).into());
                }
            }
            _ if params.account_id.is_some() => {
                return Err(SessionError::AccountNotAllowed.into());
            }
            _ => {}
        }

        if let Some(rules) = &params.feature_rules {
            if params.session_type != SessionType::Autopilot {
                return Err(SessionError::RulesNotAllowed.into());
            }
            validate_feature_rules(rules)?;
        }

        let recipe = recipe::build_recipe(
            params.session_type,
            params.custom_permissions.as_deref(),
            params.account_id.as_ref(),
        )?;

        // Claim the label atomically; collisions only count against
        // sessions that are still alive, a revoked or expired session
        // frees its label. The claim is released if the create aborts.
        self.backend.reserve_label(&params.label, now)?;

        let mut root_key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut root_key);
        let mut local_public_key = vec![0u8; 33];
        rand::thread_rng().fill_bytes(&mut local_public_key);

        // Mint before persisting so a signer failure leaves no trace.
        let minted = match self.signer.mint(&root_key, &recipe) {
            Ok(minted) => minted,
            Err(err) => {
                self.backend.release_label(&params.label);
                return Err(err.into());
            }
        };

        let id = SessionId::derive(&root_key);
        let session = Session {
            id,
            group_id: group_id.unwrap_or(id),
            label: params.label,
            state: if params.reserved {
                SessionState::Reserved
            } else {
                SessionState::Created
            },
            session_type: params.session_type,
            expiry: params.expiry,
            created_at: now,
            macaroon_root_key: root_key,
            local_public_key,
            pairing_secret: minted.pairing_secret,
            macaroon_recipe: recipe,
            account_id: params.account_id,
            feature_rules: params.feature_rules,
            privacy_flags: params.privacy_flags,
            revoked_at: None,
            macaroon_server_addr: params.macaroon_server_addr,
            dev_server: params.dev_server,
        };

        if let Err(err) = self.backend.insert(session.clone()) {
            self.backend.release_label(&session.label);
            return Err(err.into());
        }
        info!(%id, label = %session.label, session_type = ?session.session_type,
              state = ?session.state, "created session");
        Ok(session)
    }

    /// Revoke the session identified by its local static key.
    ///
    /// Idempotent: revoking a session that is already `Revoked` or
    /// `Expired` succeeds without changing anything. On an actual
    /// transition the registered teardown observer is notified so the
    /// live transport can be torn down.
    pub fn revoke(&self, local_public_key: &[u8]) -> Result<Session> {
        let id = self.backend.get_by_local_key(local_public_key)?.id;
        let now = self.clock.now_unix();

        let mut transitioned = false;
        let session = self.backend.update_with(&id, &mut |session| {
            session.apply_lazy_expiry(now);
            if session.is_terminal() {
                transitioned = false;
                return Ok(());
            }
            session.transition(SessionState::Revoked)?;
            session.revoked_at = Some(now);
            transitioned = true;
            Ok(())
        })?;

        if transitioned {
            info!(%id, "revoked session");
            if let Some(teardown) = self.teardown.read().as_ref() {
                teardown.session_revoked(&session);
            }
        }
        Ok(session)
    }

    /// Record the first authenticated call under a session. Idempotent
    /// once the session is `InUse`; terminal sessions are rejected.
    pub fn mark_in_use(&self, id: &SessionId) -> Result<Session> {
        let now = self.clock.now_unix();
        let session = self.backend.update_with(id, &mut |session| {
            session.apply_lazy_expiry(now);
            match session.state {
                SessionState::InUse => Ok(()),
                state if state.is_terminal() => Err(SessionError::Terminal(state)),
                _ => session.transition(SessionState::InUse),
            }
        })?;
        debug!(%id, "session marked in use");
        Ok(session)
    }

    /// Fetch one session, applying lazy expiry.
    pub fn get(&self, id: &SessionId) -> Result<Session> {
        Ok(self.refresh(id)?)
    }

    /// Fetch one session by its local static key, applying lazy expiry.
    pub fn get_by_local_key(&self, key: &[u8]) -> Result<Session> {
        let id = self.backend.get_by_local_key(key)?.id;
        Ok(self.refresh(&id)?)
    }

    /// All sessions in creation order, each with lazy expiry applied.
    pub fn list(&self) -> Vec<Session> {
        self.backend
            .list()
            .into_iter()
            .filter_map(|session| self.refresh(&session.id).ok())
            .collect()
    }

    /// Returns true if any non-terminal session references the account.
    pub fn has_active_reference(&self, account: &AccountId) -> bool {
        self.list()
            .into_iter()
            .any(|session| session.account_id.as_ref() == Some(account) && !session.is_terminal())
    }

    /// Apply the lazy expiry rule to one session and persist the outcome.
    fn refresh(&self, id: &SessionId) -> std::result::Result<Session, SessionError> {
        let now = self.clock.now_unix();
        self.backend.update_with(id, &mut |session| {
            session.apply_lazy_expiry(now);
            Ok(())
        })
    }
}
