//! Session registry and lifecycle (§9: global mutable state replaced by a
//! session registry lookup).
//!
//! A session is ephemeral: all state lives in memory and is freed on
//! disconnect, per §6's "Persisted state: None."

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use thiserror::Error;

/// Clamp range for `RDP_MAX_SESSIONS` (§6 Configuration).
pub const MIN_MAX_SESSIONS: usize = 2;
pub const MAX_MAX_SESSIONS: usize = 1000;
pub const DEFAULT_MAX_SESSIONS: usize = 100;

/// Clamps a requested session cap into `[MIN_MAX_SESSIONS, MAX_MAX_SESSIONS]`.
#[must_use]
pub fn clamp_max_sessions(requested: usize) -> usize {
    requested.clamp(MIN_MAX_SESSIONS, MAX_MAX_SESSIONS)
}

/// Opaque handle identifying a session, replacing a global context pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Disconnected,
    Error,
}

/// Per-session lifecycle state. Owns only identifiers and bookkeeping here;
/// the pixel/codec state lives in `gwgfx-egfx`'s `SurfaceBank` and
/// `gwgfx-h264`'s `FrameQueue`, owned per-session by the gateway layer.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub state: SessionState,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session registry is full ({max} sessions)")]
    RegistryFull { max: usize },
    #[error("unknown session {0:?}")]
    UnknownSession(SessionId),
    #[error("cannot change max_sessions to {requested} while {live} sessions are live")]
    CapacityChangeRejected { requested: usize, live: usize },
}

/// Single global mutex table keyed by an opaque session handle (§5: "Session
/// registry: single global mutex; held only over lookups and add/remove").
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Session>>,
    next_id: AtomicU64,
    max_sessions: Mutex<usize>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_sessions: Mutex::new(clamp_max_sessions(max_sessions)),
        }
    }

    #[must_use]
    pub fn max_sessions(&self) -> usize {
        #[expect(clippy::unwrap_used, reason = "poisoned mutex means the process is already unwinding")]
        *self.max_sessions.lock().unwrap()
    }

    /// Changes the session cap. Per §6, this fails while any session is live.
    pub fn set_max_sessions(&self, requested: usize) -> Result<(), SessionError> {
        #[expect(clippy::unwrap_used, reason = "poisoned mutex means the process is already unwinding")]
        let sessions = self.sessions.lock().unwrap();
        if !sessions.is_empty() {
            return Err(SessionError::CapacityChangeRejected {
                requested,
                live: sessions.len(),
            });
        }
        #[expect(clippy::unwrap_used, reason = "poisoned mutex means the process is already unwinding")]
        let mut max = self.max_sessions.lock().unwrap();
        *max = clamp_max_sessions(requested);
        Ok(())
    }

    pub fn create_session(&self, width: u32, height: u32) -> Result<SessionId, SessionError> {
        #[expect(clippy::unwrap_used, reason = "poisoned mutex means the process is already unwinding")]
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.len() >= self.max_sessions() {
            return Err(SessionError::RegistryFull { max: self.max_sessions() });
        }

        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        sessions.insert(
            id,
            Session {
                id,
                state: SessionState::Connecting,
                width,
                height,
            },
        );
        Ok(id)
    }

    /// Transitions to `disconnected`. Per §5 Cancellation: callers must drain
    /// and join per-session workers and free the surface bank before this,
    /// not after.
    pub fn disconnect(&self, id: SessionId) -> Result<(), SessionError> {
        #[expect(clippy::unwrap_used, reason = "poisoned mutex means the process is already unwinding")]
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(&id).ok_or(SessionError::UnknownSession(id))?;
        session.state = SessionState::Disconnected;
        Ok(())
    }

    pub fn remove(&self, id: SessionId) -> Result<(), SessionError> {
        #[expect(clippy::unwrap_used, reason = "poisoned mutex means the process is already unwinding")]
        let mut sessions = self.sessions.lock().unwrap();
        sessions.remove(&id).ok_or(SessionError::UnknownSession(id))?;
        Ok(())
    }

    pub fn set_state(&self, id: SessionId, state: SessionState) -> Result<(), SessionError> {
        #[expect(clippy::unwrap_used, reason = "poisoned mutex means the process is already unwinding")]
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(&id).ok_or(SessionError::UnknownSession(id))?;
        session.state = state;
        Ok(())
    }

    pub fn resize(&self, id: SessionId, width: u32, height: u32) -> Result<(), SessionError> {
        #[expect(clippy::unwrap_used, reason = "poisoned mutex means the process is already unwinding")]
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(&id).ok_or(SessionError::UnknownSession(id))?;
        session.width = width;
        session.height = height;
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<Session> {
        #[expect(clippy::unwrap_used, reason = "poisoned mutex means the process is already unwinding")]
        self.sessions.lock().unwrap().get(&id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        #[expect(clippy::unwrap_used, reason = "poisoned mutex means the process is already unwinding")]
        self.sessions.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SESSIONS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_max_sessions_into_range() {
        assert_eq!(clamp_max_sessions(0), MIN_MAX_SESSIONS);
        assert_eq!(clamp_max_sessions(1), MIN_MAX_SESSIONS);
        assert_eq!(clamp_max_sessions(5_000), MAX_MAX_SESSIONS);
        assert_eq!(clamp_max_sessions(250), 250);
    }

    #[test]
    fn rejects_create_past_capacity() {
        let registry = SessionRegistry::new(MIN_MAX_SESSIONS);
        registry.create_session(800, 600).unwrap();
        registry.create_session(800, 600).unwrap();

        let err = registry.create_session(800, 600).unwrap_err();
        assert!(matches!(err, SessionError::RegistryFull { max: MIN_MAX_SESSIONS }));
    }

    #[test]
    fn capacity_change_rejected_while_sessions_live() {
        let registry = SessionRegistry::new(DEFAULT_MAX_SESSIONS);
        let _id = registry.create_session(800, 600).unwrap();

        let err = registry.set_max_sessions(10).unwrap_err();
        assert!(matches!(err, SessionError::CapacityChangeRejected { requested: 10, live: 1 }));
    }

    #[test]
    fn capacity_change_allowed_when_empty() {
        let registry = SessionRegistry::new(DEFAULT_MAX_SESSIONS);
        registry.set_max_sessions(10).unwrap();
        assert_eq!(registry.max_sessions(), 10);
    }

    #[test]
    fn disconnect_then_remove_lifecycle() {
        let registry = SessionRegistry::new(DEFAULT_MAX_SESSIONS);
        let id = registry.create_session(800, 600).unwrap();

        registry.disconnect(id).unwrap();
        assert_eq!(registry.get(id).unwrap().state, SessionState::Disconnected);

        registry.remove(id).unwrap();
        assert!(registry.get(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn resize_updates_session_dimensions() {
        let registry = SessionRegistry::new(DEFAULT_MAX_SESSIONS);
        let id = registry.create_session(800, 600).unwrap();

        registry.resize(id, 1920, 1080).unwrap();
        let session = registry.get(id).unwrap();
        assert_eq!((session.width, session.height), (1920, 1080));
    }

    #[test]
    fn unknown_session_operations_fail() {
        let registry = SessionRegistry::new(DEFAULT_MAX_SESSIONS);
        let fake = SessionId(999);
        assert!(matches!(registry.disconnect(fake), Err(SessionError::UnknownSession(_))));
        assert!(matches!(registry.remove(fake), Err(SessionError::UnknownSession(_))));
    }
}
