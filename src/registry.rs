//! Session registry
//!
//! Concurrent `SessionId -> Session` map shared by every connection
//! handler. It is the only place display names are enumerated for
//! presence, so every snapshot is taken under a single read lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;
use tracing::debug;

use crate::identity::IdentityGenerator;
use crate::session::Session;
use crate::types::SessionId;

/// Fresh ids drawn before falling back to a counter suffix
const MAX_REGENERATE: usize = 8;

#[derive(Debug)]
struct Entry {
    /// Join order, keeps rosters stable
    seq: u64,
    session: Session,
}

/// Registry of all live sessions
///
/// Thread-safe for concurrent access from multiple handler tasks.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Entry>>,
    next_seq: AtomicU64,
    collisions: AtomicU64,
}

impl SessionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session unless its id is already live
    ///
    /// Returns false on collision; the existing session is left untouched.
    pub async fn try_add(&self, session: Session) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return false;
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        debug!(session = %session.id, name = %session.display_name, "session registered");
        sessions.insert(session.id.clone(), Entry { seq, session });
        true
    }

    /// Register a session under a freshly generated, unique id
    ///
    /// `build` turns an id into the session to insert. Collisions draw a
    /// new id; after a few attempts a counter is appended instead.
    pub async fn register(
        &self,
        ids: &IdentityGenerator,
        display_name: &str,
        build: impl Fn(SessionId) -> Session,
    ) -> Session {
        let base = ids.generate(display_name);
        let mut candidate = base.clone();
        let mut attempt = 0usize;

        loop {
            let session = build(candidate.clone());
            if self.try_add(session.clone()).await {
                return session;
            }

            attempt += 1;
            self.collisions.fetch_add(1, Ordering::Relaxed);
            debug!(id = %candidate, attempt, "session id collision");

            candidate = if attempt < MAX_REGENERATE {
                ids.generate(display_name)
            } else {
                SessionId(format!("{}_{}", base, attempt))
            };
        }
    }

    /// Remove a session (idempotent)
    ///
    /// Only the first call for a given id returns the session.
    pub async fn remove(&self, id: &SessionId) -> Option<Session> {
        let removed = self.sessions.write().await.remove(id).map(|e| e.session);
        if removed.is_some() {
            debug!(session = %id, "session removed");
        }
        removed
    }

    /// Display names of every live session, in join order
    pub async fn snapshot(&self) -> Vec<String> {
        self.sessions()
            .await
            .into_iter()
            .map(|s| s.display_name)
            .collect()
    }

    /// Handles of every live session, in join order
    pub async fn sessions(&self) -> Vec<Session> {
        let sessions = self.sessions.read().await;
        let mut entries: Vec<&Entry> = sessions.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.session.clone()).collect()
    }

    /// Look up a session by id
    pub async fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions.read().await.get(id).map(|e| e.session.clone())
    }

    /// First session (in join order) whose display name matches, ignoring case
    pub async fn find_by_name(&self, name: &str) -> Option<Session> {
        let wanted = name.to_lowercase();
        self.sessions()
            .await
            .into_iter()
            .find(|s| s.display_name.to_lowercase() == wanted)
    }

    /// Remove and return every session
    pub async fn drain(&self) -> Vec<Session> {
        let mut entries: Vec<Entry> = self
            .sessions
            .write()
            .await
            .drain()
            .map(|(_, e)| e)
            .collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.session).collect()
    }

    /// Number of live sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Check whether no session is registered
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Number of id collisions resolved so far
    pub fn collisions(&self) -> u64 {
        self.collisions.load(Ordering::Relaxed)
    }
}
