//! Session storage.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

use warden_core::error::SessionError;
use warden_core::id::SessionId;

use crate::session::Session;

/// Storage backend for session records.
///
/// `update_with` is the linearization point for state transitions: the
/// closure runs while the record is exclusively held, so a revocation and
/// a concurrent authorization resolve in a deterministic order.
pub trait SessionBackend: Send + Sync {
    /// Atomically claim a label for a create in flight. Fails with
    /// `DuplicateLabel` while any session alive at `now` holds the label
    /// or another claim is pending. The claim is consumed by `insert`
    /// and must be released with `release_label` if the create aborts.
    fn reserve_label(&self, label: &str, now: i64) -> Result<(), SessionError>;

    /// Release a pending label claim. Labels owned by inserted sessions
    /// are unaffected.
    fn release_label(&self, label: &str);

    /// Insert a new session, taking ownership of its label claim.
    fn insert(&self, session: Session) -> Result<(), SessionError>;

    /// Fetch a session by id.
    fn get(&self, id: &SessionId) -> Result<Session, SessionError>;

    /// Fetch a session by its local static public key.
    fn get_by_local_key(&self, key: &[u8]) -> Result<Session, SessionError>;

    /// Atomically read-modify-write one session. The mutation is only
    /// applied if the closure returns `Ok`; the updated record is
    /// returned.
    fn update_with(
        &self,
        id: &SessionId,
        mutate: &mut dyn FnMut(&mut Session) -> Result<(), SessionError>,
    ) -> Result<Session, SessionError>;

    /// All sessions in creation order.
    fn list(&self) -> Vec<Session>;
}

/// An in-memory session backend.
#[derive(Clone, Default)]
pub struct InMemorySessionBackend {
    /// The sessions, indexed by id.
    sessions: Arc<DashMap<SessionId, Session>>,

    /// Local static key index.
    local_keys: Arc<DashMap<Vec<u8>, SessionId>>,

    /// Label index. `None` marks a claim by a create in flight; `Some`
    /// points at the session currently owning the label.
    labels: Arc<DashMap<String, Option<SessionId>>>,

    /// Ids in creation order.
    order: Arc<Mutex<Vec<SessionId>>>,
}

impl InMemorySessionBackend {
    /// Create a new in-memory session backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionBackend for InMemorySessionBackend {
    fn reserve_label(&self, label: &str, now: i64) -> Result<(), SessionError> {
        // The entry guard makes the liveness check and the claim one
        // step; two concurrent creates with the same label serialize
        // here and the loser sees the claim.
        match self.labels.entry(label.to_string()) {
            Entry::Occupied(mut occupied) => {
                match occupied.get() {
                    None => Err(SessionError::DuplicateLabel(label.to_string())),
                    Some(id) => {
                        let live = self
                            .sessions
                            .get(id)
                            .map(|session| !session.is_dead(now))
                            .unwrap_or(false);
                        if live {
                            return Err(SessionError::DuplicateLabel(label.to_string()));
                        }
                        // The previous holder is dead; take the label over.
                        occupied.insert(None);
                        Ok(())
                    }
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(None);
                Ok(())
            }
        }
    }

    fn release_label(&self, label: &str) {
        self.labels.remove_if(label, |_, holder| holder.is_none());
    }

    fn insert(&self, session: Session) -> Result<(), SessionError> {
        let id = session.id;
        let label = session.label.clone();
        let local_key = session.local_public_key.clone();
        match self.sessions.entry(id) {
            Entry::Occupied(_) => return Err(SessionError::AlreadyExists),
            Entry::Vacant(vacant) => {
                vacant.insert(session);
            }
        }
        self.local_keys.insert(local_key, id);
        self.labels.insert(label, Some(id));
        self.order.lock().push(id);
        Ok(())
    }

    fn get(&self, id: &SessionId) -> Result<Session, SessionError> {
        self.sessions
            .get(id)
            .map(|entry| entry.clone())
            .ok_or(SessionError::NotFound)
    }

    fn get_by_local_key(&self, key: &[u8]) -> Result<Session, SessionError> {
        let id = self
            .local_keys
            .get(key)
            .map(|entry| *entry.value())
            .ok_or(SessionError::NotFound)?;
        self.get(&id)
    }

    fn update_with(
        &self,
        id: &SessionId,
        mutate: &mut dyn FnMut(&mut Session) -> Result<(), SessionError>,
    ) -> Result<Session, SessionError> {
        // Mutations run on a scratch copy committed only on success, so
        // a denied transition leaves the record untouched.
        let mut entry = self.sessions.get_mut(id).ok_or(SessionError::NotFound)?;
        let mut scratch = entry.value().clone();
        mutate(&mut scratch)?;
        *entry.value_mut() = scratch;
        Ok(entry.clone())
    }

    fn list(&self) -> Vec<Session> {
        let order = self.order.lock();
        order
            .iter()
            .filter_map(|id| self.sessions.get(id).map(|entry| entry.clone()))
            .collect()
    }
}
