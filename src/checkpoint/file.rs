use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use super::{AgentCheckpoint, CheckpointStore, CheckpointSummary};
use crate::errors::StoreError;

/// One JSON file per session under `<root>/<agent_id>/<session_id>.json`,
/// with both ids percent-encoded into single path components.
///
/// Writes go to a temporary file in the same directory first and are then
/// renamed over the target, so readers never see a torn checkpoint.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        if !root.exists() {
            std::fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn agent_dir(&self, agent_id: &str) -> PathBuf {
        self.root.join(encode_id(agent_id))
    }

    fn checkpoint_path(&self, agent_id: &str, session_id: &str) -> PathBuf {
        self.agent_dir(agent_id)
            .join(format!("{}.json", encode_id(session_id)))
    }
}

/// Map an id to a single path component, reversibly.
///
/// ASCII alphanumerics, `-` and `_` are kept; every other byte becomes `%XX`.
/// Distinct ids therefore never share a file. The empty id maps to a lone `%`,
/// which no other id can produce.
fn encode_id(id: &str) -> String {
    if id.is_empty() {
        return "%".to_string();
    }
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push('%');
            out.push_str(&hex::encode_upper([byte]));
        }
    }
    out
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &AgentCheckpoint) -> Result<(), StoreError> {
        let dir = self.agent_dir(&checkpoint.agent_id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;

        let json =
            serde_json::to_string_pretty(checkpoint).map_err(|e| StoreError::Serialization {
                what: format!("checkpoint {}/{}", checkpoint.agent_id, checkpoint.session_id),
                message: e.to_string(),
            })?;

        let path = self.checkpoint_path(&checkpoint.agent_id, &checkpoint.session_id);
        let tmp = dir.join(format!(
            ".{}.{}.tmp",
            encode_id(&checkpoint.session_id),
            uuid::Uuid::new_v4().simple()
        ));
        fs::write(&tmp, json)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StoreError::io(&path, e));
        }

        debug!(
            agent_id = %checkpoint.agent_id,
            session_id = %checkpoint.session_id,
            phase = %checkpoint.phase,
            "Checkpoint saved"
        );
        Ok(())
    }

    async fn load(
        &self,
        agent_id: &str,
        session_id: &str,
    ) -> Result<Option<AgentCheckpoint>, StoreError> {
        let path = self.checkpoint_path(agent_id, session_id);
        let json = match fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        let checkpoint: AgentCheckpoint =
            serde_json::from_str(&json).map_err(|e| StoreError::Serialization {
                what: format!("checkpoint {}", path.display()),
                message: e.to_string(),
            })?;
        if checkpoint.agent_id != agent_id || checkpoint.session_id != session_id {
            return Err(StoreError::Serialization {
                what: format!("checkpoint {}", path.display()),
                message: format!(
                    "file holds {}/{}, expected {}/{}",
                    checkpoint.agent_id, checkpoint.session_id, agent_id, session_id
                ),
            });
        }
        Ok(Some(checkpoint))
    }

    async fn list(&self, agent_id: &str) -> Result<Vec<CheckpointSummary>, StoreError> {
        let dir = self.agent_dir(agent_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let Ok(json) = fs::read_to_string(&path).await else {
                continue;
            };
            match serde_json::from_str::<AgentCheckpoint>(&json) {
                Ok(cp) if cp.agent_id == agent_id => summaries.push(cp.summary()),
                Ok(cp) => warn!(
                    path = %path.display(),
                    found = %cp.agent_id,
                    "Skipping checkpoint filed under another agent"
                ),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable checkpoint"),
            }
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn delete(&self, agent_id: &str, session_id: &str) -> Result<bool, StoreError> {
        let path = self.checkpoint_path(agent_id, session_id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }
}
