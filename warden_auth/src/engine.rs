//! The authorization engine.

use std::sync::Arc;

use tracing::{debug, warn};

use warden_accounts::account::{Account, AccountIdentifier};
use warden_accounts::ledger::AccountLedger;
use warden_accounts::store::{AccountStore, InMemoryAccountStore};
use warden_core::clock::Clock;
use warden_core::error::{AccountError, AuthError, Error, SessionError};
use warden_core::id::SessionId;
use warden_core::macaroon::{MacaroonIdentity, MacaroonSigner};
use warden_core::types::{CallKind, SessionType};
use warden_core::Result;
use warden_rules::{CounterArena, InMemoryCounterArena, RuleContext, RuleEnforcer};
use warden_sessions::recipe;
use warden_sessions::store::{InMemorySessionBackend, SessionBackend};
use warden_sessions::{Session, SessionStore};

/// One authorization request: the requested entity/action plus whatever
/// the call proposes to spend or target.
#[derive(Clone, Debug)]
pub struct AuthRequest {
    /// The entity of the requested permission.
    pub entity: String,

    /// The requested action, or the full URI for `uri` permissions.
    pub action: String,

    /// Read or write classification.
    pub call: CallKind,

    /// Amount the call would debit from a backing account, when the call
    /// is spend-bearing.
    pub amount: Option<i64>,

    /// The feature addressed by the call, for autopilot rule lookup.
    /// Defaults to the entity name.
    pub feature: Option<String>,

    /// Full rule context; built from the other fields when absent.
    pub context: Option<RuleContext>,
}

impl AuthRequest {
    /// A plain request with no spend and no rule context.
    pub fn new(entity: impl Into<String>, action: impl Into<String>, call: CallKind) -> Self {
        Self {
            entity: entity.into(),
            action: action.into(),
            call,
            amount: None,
            feature: None,
            context: None,
        }
    }

    /// A write request that spends the given amount.
    pub fn spend(entity: impl Into<String>, action: impl Into<String>, amount: i64) -> Self {
        Self {
            amount: Some(amount),
            ..Self::new(entity, action, CallKind::Write)
        }
    }
}

/// The outcome of a granted authorization. Denials are reported as typed
/// errors, never as a decision with `allowed == false`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    /// Always true on the success path.
    pub allowed: bool,

    /// The debit applied to the backing account, if any.
    pub applied_debit: Option<i64>,

    /// The session the decision was made under, absent for bare
    /// account-scoped macaroons.
    pub session_id: Option<SessionId>,
}

/// The facade used by the request path.
///
/// Owns the ledger, the session store and the rule enforcer; the account
/// store is shared between the ledger and the session store so account
/// lookups and debits observe one consistent state.
pub struct AuthorizationEngine<AS, SB, CA> {
    ledger: AccountLedger<AS>,
    sessions: SessionStore<SB, AS>,
    enforcer: RuleEnforcer<CA>,
    clock: Arc<dyn Clock>,
}

impl AuthorizationEngine<InMemoryAccountStore, InMemorySessionBackend, InMemoryCounterArena> {
    /// An engine over fresh in-memory stores.
    pub fn in_memory(clock: Arc<dyn Clock>, signer: Arc<dyn MacaroonSigner>) -> Self {
        let accounts = InMemoryAccountStore::new();
        let ledger = AccountLedger::new(accounts.clone(), clock.clone(), signer.clone());
        let sessions = SessionStore::new(
            InMemorySessionBackend::new(),
            accounts,
            clock.clone(),
            signer,
        );
        let enforcer = RuleEnforcer::new(InMemoryCounterArena::new());
        Self::new(ledger, sessions, enforcer, clock)
    }
}

impl<AS, SB, CA> AuthorizationEngine<AS, SB, CA>
where
    AS: AccountStore,
    SB: SessionBackend,
    CA: CounterArena,
{
    /// Assemble an engine from its parts. The ledger and the session
    /// store must share one account store.
    pub fn new(
        ledger: AccountLedger<AS>,
        sessions: SessionStore<SB, AS>,
        enforcer: RuleEnforcer<CA>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            sessions,
            enforcer,
            clock,
        }
    }

    /// The account ledger.
    pub fn ledger(&self) -> &AccountLedger<AS> {
        &self.ledger
    }

    /// The session store.
    pub fn sessions(&self) -> &SessionStore<SB, AS> {
        &self.sessions
    }

    /// The rule enforcer.
    pub fn enforcer(&self) -> &RuleEnforcer<CA> {
        &self.enforcer
    }

    /// Authorize one privileged call.
    ///
    /// Resolves the presented identity, checks recipe permissions,
    /// debits the backing account for spend-bearing calls, evaluates the
    /// addressed feature's rules for autopilot sessions, and marks the
    /// session in use. The first failing check denies the call with its
    /// specific error.
    pub fn authorize(
        &self,
        identity: &MacaroonIdentity,
        request: &AuthRequest,
    ) -> Result<Decision> {
        match identity {
            MacaroonIdentity::Session(root_key) => {
                let id = SessionId::derive(root_key);
                let session = match self.sessions.get(&id) {
                    Ok(session) => session,
                    Err(Error::Session(SessionError::NotFound)) => {
                        return Err(AuthError::UnknownIdentity.into());
                    }
                    Err(err) => return Err(err),
                };
                self.authorize_session(session, request)
            }
            MacaroonIdentity::Account(account_id) => {
                let identifier = AccountIdentifier::Id(*account_id);
                if self.ledger.lookup(&identifier).is_err() {
                    return Err(AuthError::UnknownIdentity.into());
                }

                // Bare account macaroons carry the fixed account recipe.
                let account_recipe =
                    recipe::build_recipe(SessionType::AccountMacaroon, None, Some(account_id))?;
                if !recipe::permits(&account_recipe, &request.entity, &request.action) {
                    return Err(self.deny_permission(request));
                }

                let applied_debit = match request.amount {
                    Some(amount) => {
                        self.ledger.debit(&identifier, amount)?;
                        Some(amount)
                    }
                    None => None,
                };

                debug!(account = %account_id, entity = %request.entity,
                       action = %request.action, "authorized account call");
                Ok(Decision {
                    allowed: true,
                    applied_debit,
                    session_id: None,
                })
            }
        }
    }

    fn authorize_session(&self, session: Session, request: &AuthRequest) -> Result<Decision> {
        if session.is_terminal() {
            return Err(SessionError::Terminal(session.state).into());
        }

        if !recipe::permits(&session.macaroon_recipe, &request.entity, &request.action) {
            return Err(self.deny_permission(request));
        }

        // Spend-bearing calls on an account-backed session go through the
        // ledger, which owns the balance and expiry invariants.
        let mut applied_debit = None;
        if let (Some(account_id), Some(amount)) = (session.account_id, request.amount) {
            self.ledger
                .debit(&AccountIdentifier::Id(account_id), amount)?;
            applied_debit = Some(amount);
        }

        if let Some(feature_rules) = &session.feature_rules {
            let feature = request.feature.as_deref().unwrap_or(&request.entity);
            if let Some(rules) = feature_rules.get(feature) {
                let context = request.context.clone().unwrap_or_else(|| RuleContext {
                    amount_msat: request.amount.unwrap_or(0).max(0) as u64,
                    ..RuleContext::new(request.call, self.clock.now_unix())
                });
                self.enforcer
                    .check(&session.id, feature, rules, &context)?;
            }
        }

        // Deny-wins: a revocation that landed while this call was in
        // flight makes mark_in_use fail, denying the call. The debit has
        // already committed in that case, so it is credited back and the
        // denial leaves no partial mutation.
        let session = match self.sessions.mark_in_use(&session.id) {
            Ok(session) => session,
            Err(err) => {
                if let (Some(account_id), Some(amount)) = (session.account_id, applied_debit) {
                    let identifier = AccountIdentifier::Id(account_id);
                    if let Err(refund_err) = self.ledger.credit(&identifier, amount) {
                        warn!(account = %account_id, amount, error = %refund_err,
                              "failed to refund debit of denied call");
                    }
                }
                return Err(err);
            }
        };

        debug!(session = %session.id, entity = %request.entity,
               action = %request.action, "authorized session call");
        Ok(Decision {
            allowed: true,
            applied_debit,
            session_id: Some(session.id),
        })
    }

    fn deny_permission(&self, request: &AuthRequest) -> Error {
        warn!(entity = %request.entity, action = %request.action, "permission denied");
        AuthError::PermissionDenied {
            entity: request.entity.clone(),
            action: request.action.clone(),
        }
        .into()
    }

    /// Remove an account, refusing while any non-terminal session still
    /// references it.
    pub fn remove_account(&self, identifier: &AccountIdentifier) -> Result<Account> {
        let account = self.ledger.lookup(identifier)?;
        if self.sessions.has_active_reference(&account.id) {
            return Err(AccountError::InUse(account.id).into());
        }
        self.ledger.remove(&AccountIdentifier::Id(account.id))
    }
}
