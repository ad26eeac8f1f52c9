//! End-to-end authorization tests across the ledger, session store and
//! rule enforcer.

use std::sync::{Arc, Mutex};
use std::thread;

use warden_accounts::account::{Account, AccountIdentifier};
use warden_accounts::ledger::AccountLedger;
use warden_accounts::store::{AccountStore, InMemoryAccountStore};
use warden_auth::{AuthRequest, AuthorizationEngine, Decision};
use warden_core::clock::ManualClock;
use warden_core::error::{AccountError, AuthError, Error, RuleError, SessionError, SignerError};
use warden_core::id::{AccountId, SessionId};
use warden_core::macaroon::{MacaroonIdentity, MacaroonRecipe, MacaroonSigner, MintedMacaroon};
use warden_core::types::{CallKind, SessionState, SessionType};
use warden_rules::{
    CounterArena, FeatureRules, InMemoryCounterArena, Rate, RuleEnforcer, RuleValue, RulesMap,
};
use warden_sessions::store::{InMemorySessionBackend, SessionBackend};
use warden_sessions::{SessionParams, SessionStore};

struct MockSigner;

impl MacaroonSigner for MockSigner {
    fn mint(
        &self,
        _root_key: &[u8],
        recipe: &MacaroonRecipe,
    ) -> Result<MintedMacaroon, SignerError> {
        let macaroon = serde_json::to_vec(recipe)
            .map_err(|err| SignerError::SigningFailed(err.to_string()))?;
        Ok(MintedMacaroon {
            macaroon,
            pairing_secret: vec![0xAB; 14],
        })
    }
}

type TestEngine = AuthorizationEngine<
    warden_accounts::store::InMemoryAccountStore,
    warden_sessions::store::InMemorySessionBackend,
    warden_rules::InMemoryCounterArena,
>;

fn engine_with_clock(clock: Arc<ManualClock>) -> TestEngine {
    AuthorizationEngine::in_memory(clock, Arc::new(MockSigner))
}

fn engine() -> TestEngine {
    engine_with_clock(ManualClock::new(1_000))
}

fn params(label: &str, session_type: SessionType) -> SessionParams {
    SessionParams::new(label, session_type, 1_000_000, "localhost:8443")
}

fn budget_rules(max_amt: u64, max_fees: u64) -> FeatureRules {
    let mut rules = RulesMap::new();
    rules.insert(
        "budget".to_string(),
        RuleValue::OffChainBudget { max_amt, max_fees },
    );
    let mut features = FeatureRules::new();
    features.insert("rebalance".to_string(), rules);
    features
}

#[test]
fn readonly_session_round_trip() {
    let engine = engine();
    let session = engine
        .sessions()
        .add(params("viewer", SessionType::ReadOnlyMacaroon))
        .unwrap();
    let identity = MacaroonIdentity::Session(session.macaroon_root_key.clone());

    let decision = engine
        .authorize(
            &identity,
            &AuthRequest::new("uri", "/lnrpc.Lightning/GetInfo", CallKind::Read),
        )
        .unwrap();
    assert_eq!(
        decision,
        Decision {
            allowed: true,
            applied_debit: None,
            session_id: Some(session.id),
        }
    );

    // The first authenticated call moved the session into InUse.
    assert_eq!(
        engine.sessions().get(&session.id).unwrap().state,
        SessionState::InUse
    );

    // Anything outside the read-only surface is denied.
    let err = engine
        .authorize(
            &identity,
            &AuthRequest::new("uri", "/lnrpc.Lightning/SendPayment", CallKind::Write),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Auth(AuthError::PermissionDenied { .. })
    ));
}

#[test]
fn unknown_identities_are_rejected() {
    let engine = engine();

    let err = engine
        .authorize(
            &MacaroonIdentity::Session(b"never minted".to_vec()),
            &AuthRequest::new("info", "read", CallKind::Read),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Auth(AuthError::UnknownIdentity)));

    let err = engine
        .authorize(
            &MacaroonIdentity::Account(AccountId::new_random()),
            &AuthRequest::new("info", "read", CallKind::Read),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Auth(AuthError::UnknownIdentity)));
}

#[test]
fn account_session_debits_through_ledger() {
    let engine = engine();
    let (account, _) = engine.ledger().create(1_000, 0, None).unwrap();

    let mut p = params("spender", SessionType::AccountMacaroon);
    p.account_id = Some(account.id);
    let session = engine.sessions().add(p).unwrap();
    let identity = MacaroonIdentity::Session(session.macaroon_root_key.clone());

    let decision = engine
        .authorize(&identity, &AuthRequest::spend("offchain", "write", 400))
        .unwrap();
    assert_eq!(decision.applied_debit, Some(400));
    assert_eq!(
        engine
            .ledger()
            .lookup(&AccountIdentifier::Id(account.id))
            .unwrap()
            .balance,
        600
    );

    // A spend beyond the remaining balance is denied and changes nothing.
    let err = engine
        .authorize(&identity, &AuthRequest::spend("offchain", "write", 700))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Account(AccountError::InsufficientBalance {
            balance: 600,
            requested: 700,
        })
    ));
    assert_eq!(
        engine
            .ledger()
            .lookup(&AccountIdentifier::Id(account.id))
            .unwrap()
            .balance,
        600
    );
}

#[test]
fn bare_account_macaroon_authorizes_and_debits() {
    let engine = engine();
    let (account, _) = engine.ledger().create(500, 0, None).unwrap();
    let identity = MacaroonIdentity::Account(account.id);

    let decision = engine
        .authorize(&identity, &AuthRequest::spend("offchain", "write", 200))
        .unwrap();
    assert_eq!(decision.applied_debit, Some(200));
    assert_eq!(decision.session_id, None);

    // The account recipe does not include admin-only entities.
    let err = engine
        .authorize(&identity, &AuthRequest::new("peers", "write", CallKind::Write))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Auth(AuthError::PermissionDenied { .. })
    ));
}

#[test]
fn revoked_session_is_rejected_for_everything() {
    let engine = engine();
    let session = engine
        .sessions()
        .add(params("admin", SessionType::AdminMacaroon))
        .unwrap();
    let identity = MacaroonIdentity::Session(session.macaroon_root_key.clone());

    engine.sessions().revoke(&session.local_public_key).unwrap();

    for (entity, action, call) in [
        ("info", "read", CallKind::Read),
        ("offchain", "write", CallKind::Write),
        ("peers", "write", CallKind::Write),
    ] {
        let err = engine
            .authorize(&identity, &AuthRequest::new(entity, action, call))
            .unwrap_err();
        assert!(
            matches!(
                err,
                Error::Session(SessionError::Terminal(SessionState::Revoked))
            ),
            "revoked session must deny {entity}/{action}"
        );
    }
}

#[test]
fn expired_session_is_rejected_lazily() {
    let clock = ManualClock::new(1_000);
    let engine = engine_with_clock(clock.clone());

    let mut p = params("shortlived", SessionType::AdminMacaroon);
    p.expiry = 2_000;
    let session = engine.sessions().add(p).unwrap();
    let identity = MacaroonIdentity::Session(session.macaroon_root_key.clone());

    engine
        .authorize(&identity, &AuthRequest::new("info", "read", CallKind::Read))
        .unwrap();

    clock.set(2_000);
    let err = engine
        .authorize(&identity, &AuthRequest::new("info", "read", CallKind::Read))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Session(SessionError::Terminal(SessionState::Expired))
    ));
}

#[test]
fn autopilot_budget_enforced_across_calls() {
    let engine = engine();
    let mut p = params("agent", SessionType::Autopilot);
    p.feature_rules = Some(budget_rules(5_000, 50));
    let session = engine.sessions().add(p).unwrap();
    let identity = MacaroonIdentity::Session(session.macaroon_root_key.clone());

    let mut request = AuthRequest::spend("offchain", "write", 2_000);
    request.feature = Some("rebalance".to_string());

    engine.authorize(&identity, &request).unwrap();
    engine.authorize(&identity, &request).unwrap();

    let err = engine.authorize(&identity, &request).unwrap_err();
    assert!(matches!(
        err,
        Error::Rule(RuleError::BudgetExceeded {
            spent: 4_000,
            requested: 2_000,
            max: 5_000,
            ..
        })
    ));

    // The denied call left the running total untouched.
    let snapshot = engine
        .enforcer()
        .arena()
        .snapshot(&session.id, "rebalance")
        .unwrap();
    assert_eq!(snapshot.budget_snapshot("budget").unwrap().amt_spent, 4_000);
}

#[test]
fn autopilot_rate_limit_enforced() {
    let engine = engine();

    let mut rules = RulesMap::new();
    rules.insert(
        "rate".to_string(),
        RuleValue::RateLimit {
            read_limit: Rate {
                iterations: 3,
                num_hours: 1,
            },
            write_limit: Rate {
                iterations: 0,
                num_hours: 0,
            },
        },
    );
    let mut features = FeatureRules::new();
    features.insert("status".to_string(), rules);

    let mut p = params("agent", SessionType::Autopilot);
    p.feature_rules = Some(features);
    let session = engine.sessions().add(p).unwrap();
    let identity = MacaroonIdentity::Session(session.macaroon_root_key.clone());

    let mut request = AuthRequest::new("uri", "/lnrpc.Lightning/GetInfo", CallKind::Read);
    request.feature = Some("status".to_string());

    for _ in 0..3 {
        engine.authorize(&identity, &request).unwrap();
    }
    let err = engine.authorize(&identity, &request).unwrap_err();
    assert!(matches!(
        err,
        Error::Rule(RuleError::RateLimitExceeded {
            limit: 3,
            window_hours: 1,
            ..
        })
    ));
}

#[test]
fn account_removal_blocked_while_referenced() {
    let engine = engine();
    let (account, _) = engine.ledger().create(1_000, 0, None).unwrap();

    let mut p = params("spender", SessionType::AccountMacaroon);
    p.account_id = Some(account.id);
    let session = engine.sessions().add(p).unwrap();

    // Move the session into InUse to match the worked example.
    let identity = MacaroonIdentity::Session(session.macaroon_root_key.clone());
    engine
        .authorize(&identity, &AuthRequest::new("info", "read", CallKind::Read))
        .unwrap();

    let identifier = AccountIdentifier::Id(account.id);
    let err = engine.remove_account(&identifier).unwrap_err();
    assert!(matches!(err, Error::Account(AccountError::InUse(id)) if id == account.id));

    engine.sessions().revoke(&session.local_public_key).unwrap();
    engine.remove_account(&identifier).unwrap();
    assert!(engine.ledger().lookup(&identifier).is_err());
}

#[test]
fn concurrent_spends_exhaust_the_account_exactly() {
    let engine = Arc::new(engine());
    let (account, _) = engine.ledger().create(1_000, 0, None).unwrap();

    let mut p = params("spender", SessionType::AccountMacaroon);
    p.account_id = Some(account.id);
    let session = engine.sessions().add(p).unwrap();
    let root_key = session.macaroon_root_key.clone();

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let identity = MacaroonIdentity::Session(root_key.clone());
            thread::spawn(move || {
                engine
                    .authorize(&identity, &AuthRequest::spend("offchain", "write", 100))
                    .is_ok()
            })
        })
        .collect();

    let successes = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .filter(|succeeded| *succeeded)
        .count();

    assert_eq!(successes, 10);
    assert_eq!(
        engine
            .ledger()
            .lookup(&AccountIdentifier::Id(account.id))
            .unwrap()
            .balance,
        0
    );
}

/// An account store that flips a target session into `Revoked` right
/// after each balance mutation commits, landing a revocation in the
/// window between a debit and the session's final usage transition.
#[derive(Clone)]
struct RevokeAfterMutation {
    inner: InMemoryAccountStore,
    sessions: InMemorySessionBackend,
    target: Arc<Mutex<Option<SessionId>>>,
}

impl RevokeAfterMutation {
    fn new(sessions: InMemorySessionBackend) -> Self {
        Self {
            inner: InMemoryAccountStore::new(),
            sessions,
            target: Arc::new(Mutex::new(None)),
        }
    }
}

impl AccountStore for RevokeAfterMutation {
    fn insert(&self, account: Account) -> Result<(), AccountError> {
        self.inner.insert(account)
    }

    fn get(&self, id: &AccountId) -> Result<Account, AccountError> {
        self.inner.get(id)
    }

    fn get_by_label(&self, label: &str) -> Result<Account, AccountError> {
        self.inner.get_by_label(label)
    }

    fn update_with(
        &self,
        id: &AccountId,
        mutate: &mut dyn FnMut(&mut Account) -> Result<(), AccountError>,
    ) -> Result<Account, AccountError> {
        let account = self.inner.update_with(id, mutate)?;
        if let Some(session_id) = *self.target.lock().unwrap() {
            let _ = self.sessions.update_with(&session_id, &mut |session| {
                session.state = SessionState::Revoked;
                Ok(())
            });
        }
        Ok(account)
    }

    fn remove(&self, id: &AccountId) -> Result<Account, AccountError> {
        self.inner.remove(id)
    }

    fn list(&self) -> Vec<Account> {
        self.inner.list()
    }
}

#[test]
fn revocation_racing_a_spend_refunds_the_debit() {
    let clock = ManualClock::new(1_000);
    let signer: Arc<dyn MacaroonSigner> = Arc::new(MockSigner);
    let backend = InMemorySessionBackend::new();
    let accounts = RevokeAfterMutation::new(backend.clone());

    let ledger = AccountLedger::new(accounts.clone(), clock.clone(), signer.clone());
    let sessions = SessionStore::new(backend, accounts.clone(), clock.clone(), signer);
    let engine = AuthorizationEngine::new(
        ledger,
        sessions,
        RuleEnforcer::new(InMemoryCounterArena::new()),
        clock,
    );

    let (account, _) = engine.ledger().create(1_000, 0, None).unwrap();
    let mut p = params("spender", SessionType::AccountMacaroon);
    p.account_id = Some(account.id);
    let session = engine.sessions().add(p).unwrap();
    *accounts.target.lock().unwrap() = Some(session.id);

    let identity = MacaroonIdentity::Session(session.macaroon_root_key.clone());
    let err = engine
        .authorize(&identity, &AuthRequest::spend("offchain", "write", 400))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Session(SessionError::Terminal(SessionState::Revoked))
    ));

    // The denial left no partial mutation: the committed debit was
    // credited back.
    assert_eq!(
        engine
            .ledger()
            .lookup(&AccountIdentifier::Id(account.id))
            .unwrap()
            .balance,
        1_000
    );
}
