//! Session persistence boundary.
//!
//! A session wraps an execution state with an identity and a version that
//! grows by one on every successful write. Store implementations live in
//! the `stepwise-session` crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionError;
use crate::state::ExecutionState;

/// Unique identifier for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A persisted execution state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,

    /// 0 until created, then +1 per successful write
    pub version: u64,

    pub state: ExecutionState,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// A new, not yet stored session.
    pub fn new(state: ExecutionState) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            version: 0,
            state,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: SessionId) -> Self {
        self.id = id;
        self
    }

    /// Same session carrying a newer state.
    pub fn with_state(mut self, state: ExecutionState) -> Self {
        self.state = state;
        self
    }

    /// Reject a write based on a version other than the stored one.
    pub fn ensure_current(&self, stored_version: u64) -> std::result::Result<(), SessionError> {
        if self.version == stored_version {
            Ok(())
        } else {
            Err(SessionError::VersionConflict {
                session_id: self.id.to_string(),
                expected: self.version,
                stored: stored_version,
            })
        }
    }

    /// The value a store writes on `save`.
    pub fn next_version(mut self) -> Self {
        self.version += 1;
        self.updated_at = Utc::now();
        self
    }
}

/// Storage for sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The name of this store (e.g., "in_memory", "file").
    fn name(&self) -> &str;

    /// Store a new session at version 1.
    async fn create(&self, session: Session) -> std::result::Result<Session, SessionError>;

    /// Write a newer state; the stored version grows by one.
    async fn save(&self, session: Session) -> std::result::Result<Session, SessionError>;

    /// Load a session. A missing id is `Ok(None)`.
    async fn load(&self, id: &SessionId) -> std::result::Result<Option<Session>, SessionError>;

    /// Delete a session. Returns whether it existed.
    async fn delete(&self, id: &SessionId) -> std::result::Result<bool, SessionError>;

    /// All stored session ids.
    async fn list(&self) -> std::result::Result<Vec<SessionId>, SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_unversioned() {
        let session = Session::new(ExecutionState::new());
        assert_eq!(session.version, 0);
        assert!(!session.id.as_str().is_empty());
    }

    #[test]
    fn next_version_increments() {
        let session = Session::new(ExecutionState::new()).next_version().next_version();
        assert_eq!(session.version, 2);
    }

    #[test]
    fn stale_version_is_rejected() {
        let session = Session::new(ExecutionState::new()).next_version();
        assert!(session.ensure_current(1).is_ok());
        let err = session.ensure_current(2).unwrap_err();
        assert!(matches!(err, SessionError::VersionConflict { expected: 1, stored: 2, .. }));
    }

    #[test]
    fn session_id_display() {
        let id = SessionId::from("abc");
        assert_eq!(id.to_string(), "abc");
    }
}
