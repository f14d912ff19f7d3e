//! Live session table with idle eviction

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::protocol::Info;

/// Per-connection protocol state negotiated at `initialize`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionTransport {
    /// Negotiated protocol version
    pub protocol_version: String,
    /// Client identity from `clientInfo`, when sent
    pub client_info: Option<Info>,
}

/// One logical client connection
#[derive(Debug)]
pub struct Session {
    id: String,
    transport: SessionTransport,
    credential: RwLock<String>,
    last_activity: Mutex<Instant>,
}

impl Session {
    /// Session id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Transport state owned by this session
    #[must_use]
    pub fn transport(&self) -> &SessionTransport {
        &self.transport
    }

    /// Time of the last inbound message
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    fn idle_since(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }
}

/// Concurrent table of live sessions
#[derive(Debug)]
pub struct SessionManager {
    sessions: DashMap<String, Arc<Session>>,
    timeout: Duration,
}

impl SessionManager {
    /// Create an empty table evicting after `timeout` of inactivity
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            timeout,
        }
    }

    /// Register a new session and return its generated id
    pub fn create(&self, transport: SessionTransport, initial_credential: Option<&str>) -> String {
        let id = Uuid::new_v4().to_string();
        let session = Arc::new(Session {
            id: id.clone(),
            transport,
            credential: RwLock::new(initial_credential.unwrap_or_default().to_string()),
            last_activity: Mutex::new(Instant::now()),
        });
        self.sessions.insert(id.clone(), session);
        info!(session_id = %id, sessions = self.sessions.len(), "Session created");
        id
    }

    /// Record activity on `id`, replacing its credential when one is supplied.
    ///
    /// Returns `false` when the session does not exist.
    pub fn touch(&self, id: &str, credential: Option<&str>) -> bool {
        // The shard read guard keeps a concurrent sweep from evicting between writes
        let Some(session) = self.sessions.get(id) else {
            return false;
        };
        *session.last_activity.lock() = Instant::now();
        if let Some(credential) = credential {
            *session.credential.write() = credential.to_string();
        }
        true
    }

    /// Look up a live session
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether `id` names a live session
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Stored bearer credential of `id`; empty counts as none
    #[must_use]
    pub fn credential(&self, id: &str) -> Option<String> {
        self.get(id)
            .map(|session| session.credential.read().clone())
            .filter(|c| !c.is_empty())
    }

    /// Close a session explicitly. Returns whether it existed.
    pub fn close(&self, id: &str) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            info!(session_id = %id, "Session closed");
        }
        removed
    }

    /// Number of live sessions
    #[must_use]
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Idle timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Evict every session idle for longer than the timeout
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// [`SessionManager::sweep`] against an explicit clock reading
    pub fn sweep_at(&self, now: Instant) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|id, session| {
            let keep = session.idle_since(now) <= self.timeout;
            if !keep {
                debug!(session_id = %id, "Session expired");
            }
            keep
        });
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            info!(evicted, remaining = self.sessions.len(), "Swept idle sessions");
        }
        evicted
    }
}
