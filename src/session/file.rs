use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use crate::error::StoreError;

use super::store::SessionStore;
use super::types::SessionRecord;

/// One pretty-printed JSON file per session under a directory.
#[derive(Debug, Clone)]
pub struct JsonFileSessionStore {
    dir: PathBuf,
    max_history: usize,
}

impl JsonFileSessionStore {
    pub fn new(dir: impl Into<PathBuf>, max_history: usize) -> Self {
        Self {
            dir: dir.into(),
            max_history,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        validate_session_id(session_id)?;
        Ok(self.dir.join(format!("{session_id}.json")))
    }
}

/// Ids become file names, so only a conservative character set is allowed.
pub fn validate_session_id(session_id: &str) -> Result<(), StoreError> {
    let valid = !session_id.is_empty()
        && session_id.len() <= 128
        && !session_id.starts_with('.')
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidId(session_id.to_string()))
    }
}

#[async_trait]
impl SessionStore for JsonFileSessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let path = self.path_for(session_id)?;
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let record = serde_json::from_str(&contents)?;
        Ok(Some(record))
    }

    async fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let path = self.path_for(&record.session_id)?;
        fs::create_dir_all(&self.dir).await?;

        let json = serde_json::to_string_pretty(record)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;
        debug!(session = %record.session_id, turns = record.history.len(), "session saved");
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<bool, StoreError> {
        let path = self.path_for(session_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!(session = session_id, "session deleted");
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = name.strip_suffix(".json") {
                sessions.push(id.to_string());
            }
        }
        sessions.sort();
        Ok(sessions)
    }

    fn max_history(&self) -> usize {
        self.max_history
    }
}
