//! In-memory store, for tests and runs that need no persistence.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use stepwise_core::error::SessionError;
use stepwise_core::session::{Session, SessionId, SessionStore};
use tokio::sync::RwLock;

/// Sessions kept in a map for the life of the process.
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, Session>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn create(&self, mut session: Session) -> Result<Session, SessionError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(SessionError::AlreadyExists(session.id.to_string()));
        }
        session.version = 0;
        let stored = session.next_version();
        sessions.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn save(&self, session: Session) -> Result<Session, SessionError> {
        let mut sessions = self.sessions.write().await;
        let current = sessions
            .get(&session.id)
            .ok_or_else(|| SessionError::NotFound(session.id.to_string()))?;
        session.ensure_current(current.version)?;
        let stored = session.next_version();
        sessions.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn load(&self, id: &SessionId) -> Result<Option<Session>, SessionError> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn delete(&self, id: &SessionId) -> Result<bool, SessionError> {
        Ok(self.sessions.write().await.remove(id).is_some())
    }

    async fn list(&self) -> Result<Vec<SessionId>, SessionError> {
        let mut ids: Vec<SessionId> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
