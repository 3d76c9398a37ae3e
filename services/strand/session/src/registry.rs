//! Concurrent id-to-session map with an optional capacity.

use crate::error::SessionError;
use crate::session::{Session, SessionId};
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Sessions by id.
///
/// A capacity of zero means unbounded.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<dyn Session>>,
    capacity: usize,
    /// Registered plus in-flight inserts; bounds the map without a global lock
    reserved: AtomicUsize,
    next_id: AtomicU64,
}

impl SessionRegistry {
    /// Create a registry holding at most `capacity` sessions (0 = unbounded)
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            capacity,
            reserved: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a fresh session id
    pub fn next_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a session under its own id
    pub fn insert(&self, session: Arc<dyn Session>) -> Result<(), SessionError> {
        let capacity = self.capacity;
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (capacity == 0 || n < capacity).then_some(n + 1)
            })
            .map_err(|_| SessionError::SessionFull)?;

        let id = session.id();
        match self.sessions.entry(id) {
            Entry::Occupied(_) => {
                self.reserved.fetch_sub(1, Ordering::AcqRel);
                Err(SessionError::DuplicateSession(id))
            }
            Entry::Vacant(slot) => {
                slot.insert(session);
                debug!("Registered session {}", id);
                Ok(())
            }
        }
    }

    /// Look up a session
    pub fn get(&self, id: SessionId) -> Result<Arc<dyn Session>, SessionError> {
        self.sessions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(SessionError::SessionNotExist(id))
    }

    /// Unregister a session. Does not stop it.
    pub fn remove(&self, id: SessionId) -> Result<Arc<dyn Session>, SessionError> {
        let (_, session) = self
            .sessions
            .remove(&id)
            .ok_or(SessionError::SessionNotExist(id))?;
        self.reserved.fetch_sub(1, Ordering::AcqRel);
        debug!("Unregistered session {}", id);
        Ok(session)
    }

    /// Queue `data` on the session with this id
    pub fn send(&self, id: SessionId, data: Bytes) -> Result<(), SessionError> {
        self.get(id)?.send(data)
    }

    /// Queue `data` on every registered session, returning how many accepted it
    pub fn broadcast(&self, data: &Bytes) -> usize {
        self.snapshot()
            .into_iter()
            .filter(|session| session.send(data.clone()).is_ok())
            .count()
    }

    /// Stop every registered session
    pub fn stop_all(&self) {
        let sessions = self.snapshot();
        info!("Stopping {} sessions", sessions.len());
        for session in sessions {
            session.stop();
        }
    }

    /// Registered ids
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is registered
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Configured capacity (0 = unbounded)
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Clone the sessions out so callers never hold a shard lock across a session call
    fn snapshot(&self) -> Vec<Arc<dyn Session>> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(0)
    }
}
