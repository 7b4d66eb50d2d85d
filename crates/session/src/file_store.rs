//! File-backed store: one pretty-printed JSON document per session.
//!
//! Layout: `<dir>/<session id>.json`. The directory is created on first
//! write. Writes go to a temporary file that is then renamed over the old
//! document, so a crash mid-write leaves the previous version readable.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use stepwise_core::error::SessionError;
use stepwise_core::session::{Session, SessionId, SessionStore};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const EXTENSION: &str = "json";

pub struct FileSessionStore {
    dir: PathBuf,
    // Serializes read-check-write sequences within this process.
    write_lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        debug!(dir = %dir.display(), "File session store opened");
        Self {
            dir,
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ids double as file names, so only `[A-Za-z0-9_-]` is accepted.
    fn is_storable(id: &SessionId) -> bool {
        let raw = id.as_str();
        !raw.is_empty()
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    fn path_for(&self, id: &SessionId) -> Result<PathBuf, SessionError> {
        if !Self::is_storable(id) {
            return Err(SessionError::Storage(format!("Invalid session id: {:?}", id.as_str())));
        }
        Ok(self.dir.join(format!("{id}.{EXTENSION}", id = id.as_str())))
    }

    async fn read(&self, id: &SessionId) -> Result<Option<Session>, SessionError> {
        let path = self.path_for(id)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SessionError::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| SessionError::Storage(format!("Corrupted session file {}: {e}", path.display())))
    }

    async fn write(&self, session: &Session) -> Result<(), SessionError> {
        let path = self.path_for(&session.id)?;
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            SessionError::Storage(format!("Failed to create session directory: {e}"))
        })?;

        let body = serde_json::to_string_pretty(session)
            .map_err(|e| SessionError::Storage(format!("Failed to serialize session: {e}")))?;
        let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| SessionError::Storage(format!("Failed to write session file: {e}")))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| SessionError::Storage(format!("Failed to replace session file: {e}")))?;

        debug!(session_id = %session.id, version = session.version, "Session written");
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn create(&self, mut session: Session) -> Result<Session, SessionError> {
        let _guard = self.write_lock.lock().await;
        if self.read(&session.id).await?.is_some() {
            return Err(SessionError::AlreadyExists(session.id.to_string()));
        }
        session.version = 0;
        let stored = session.next_version();
        self.write(&stored).await?;
        Ok(stored)
    }

    async fn save(&self, session: Session) -> Result<Session, SessionError> {
        let _guard = self.write_lock.lock().await;
        let current = self
            .read(&session.id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session.id.to_string()))?;
        session.ensure_current(current.version)?;
        let stored = session.next_version();
        self.write(&stored).await?;
        Ok(stored)
    }

    async fn load(&self, id: &SessionId) -> Result<Option<Session>, SessionError> {
        // An id that can never be written can never be found.
        if !Self::is_storable(id) {
            return Ok(None);
        }
        self.read(id).await
    }

    async fn delete(&self, id: &SessionId) -> Result<bool, SessionError> {
        if !Self::is_storable(id) {
            return Ok(false);
        }
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(session_id = %id, "Session deleted");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SessionError::Storage(format!("Failed to delete session: {e}"))),
        }
    }

    async fn list(&self) -> Result<Vec<SessionId>, SessionError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SessionError::Storage(format!("Failed to list sessions: {e}"))),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SessionError::Storage(format!("Failed to list sessions: {e}")))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => ids.push(SessionId::from(stem)),
                None => warn!(path = %path.display(), "Skipping session file with a non-UTF-8 name"),
            }
        }
        ids.sort();
        Ok(ids)
    }
}
