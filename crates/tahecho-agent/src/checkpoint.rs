//! Per-conversation checkpoint persistence

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    state::ConversationState,
};

/// Summary of a stored conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub conversation_id: String,
    pub updated_at: i64,
    pub message_count: usize,
}

impl CheckpointInfo {
    fn of(conversation_id: &str, state: &ConversationState) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            updated_at: state.updated_at,
            message_count: state.total_messages(),
        }
    }
}

/// Storage for the last state of each conversation (last write wins)
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// `Ok(None)` when nothing is stored under the id
    async fn load(&self, conversation_id: &str) -> Result<Option<ConversationState>>;

    /// Overwrite the checkpoint for the id
    async fn save(&self, conversation_id: &str, state: &ConversationState) -> Result<()>;

    /// Stored conversations, most recently updated first
    async fn list(&self) -> Result<Vec<CheckpointInfo>>;
}

/// In-process store; contents are lost when the process exits
#[derive(Default)]
pub struct MemoryCheckpointStore {
    states: Mutex<HashMap<String, ConversationState>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, conversation_id: &str) -> Result<Option<ConversationState>> {
        Ok(self.states.lock().get(conversation_id).cloned())
    }

    async fn save(&self, conversation_id: &str, state: &ConversationState) -> Result<()> {
        self.states
            .lock()
            .insert(conversation_id.to_string(), state.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<CheckpointInfo>> {
        let mut infos: Vec<CheckpointInfo> = self
            .states
            .lock()
            .iter()
            .map(|(id, state)| CheckpointInfo::of(id, state))
            .collect();
        infos.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(infos)
    }
}

/// One pretty-printed JSON file per conversation
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Default location under the platform's local data directory
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tahecho")
            .join("conversations")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, conversation_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(conversation_id)))
    }
}

/// Encode an id as a safe, reversible file stem.
///
/// ASCII alphanumerics and `-` pass through; every other byte becomes `_xx`.
fn file_stem(conversation_id: &str) -> String {
    let mut stem = String::with_capacity(conversation_id.len());
    for c in conversation_id.chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            stem.push(c);
        } else {
            let mut buf = [0u8; 4];
            for b in c.encode_utf8(&mut buf).bytes() {
                stem.push_str(&format!("_{:02x}", b));
            }
        }
    }
    stem
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, conversation_id: &str) -> Result<Option<ConversationState>> {
        let path = self.path_for(conversation_id);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state: ConversationState = serde_json::from_str(&contents).map_err(|e| {
            Error::Checkpoint(format!("corrupt checkpoint {}: {}", path.display(), e))
        })?;
        Ok(Some(state))
    }

    async fn save(&self, conversation_id: &str, state: &ConversationState) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(conversation_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(state)?;

        tokio::fs::write(&tmp, json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tracing::debug!("Saved checkpoint for {} to {}", conversation_id, path.display());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<CheckpointInfo>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut infos = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let Ok(contents) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            match serde_json::from_str::<ConversationState>(&contents) {
                Ok(state) => {
                    let id = state.conversation_id.clone().unwrap_or_else(|| {
                        path.file_stem()
                            .map(|s| s.to_string_lossy().into_owned())
                            .unwrap_or_default()
                    });
                    infos.push(CheckpointInfo::of(&id, &state));
                }
                Err(e) => tracing::warn!("Skipping unreadable checkpoint {}: {}", path.display(), e),
            }
        }

        infos.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(infos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TaskType;

    fn sample_state(id: &str, turns: usize) -> ConversationState {
        let mut state = ConversationState::new(Some(id.to_string()));
        for i in 0..turns {
            state.begin_turn(&format!("turn {}", i));
            state.set_classification(TaskType::General, "test");
            state.finish(format!("answer {}", i));
        }
        state
    }

    #[test]
    fn test_file_stem_is_safe_and_distinct() {
        assert_eq!(file_stem("abc-123"), "abc-123");
        assert_eq!(file_stem("../etc"), "_2e_2e_2fetc");
        assert_ne!(file_stem("a.b"), file_stem("a_b"));
        assert!(!file_stem("weird/id with spaces").contains('/'));
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryCheckpointStore::new();
        assert!(store.load("x").await.unwrap().is_none());

        let state = sample_state("x", 2);
        store.save("x", &state).await.unwrap();
        let loaded = store.load("x").await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), state.messages.len());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_file_store_round_trip_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("conversations"));

        assert!(store.load("conv/1").await.unwrap().is_none());

        let first = sample_state("conv/1", 1);
        store.save("conv/1", &first).await.unwrap();
        let second = sample_state("conv/1", 3);
        store.save("conv/1", &second).await.unwrap();

        let loaded = store.load("conv/1").await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), second.messages.len());
        assert_eq!(loaded.conversation_id.as_deref(), Some("conv/1"));

        // No temp files left behind
        let names: Vec<_> = std::fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".json"));
    }

    #[tokio::test]
    async fn test_file_store_corrupt_checkpoint_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        std::fs::write(dir.path().join("bad.json"), "{ not json").unwrap();

        assert!(matches!(store.load("bad").await, Err(Error::Checkpoint(_))));
        // Listing skips it instead of failing
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_list_sorted_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        let mut older = sample_state("older", 1);
        older.updated_at = 1_000;
        let mut newer = sample_state("newer", 2);
        newer.updated_at = 2_000;
        store.save("older", &older).await.unwrap();
        store.save("newer", &newer).await.unwrap();

        let infos = store.list().await.unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].conversation_id, "newer");
        assert_eq!(infos[0].message_count, 6);
        assert_eq!(infos[1].conversation_id, "older");
    }

    #[tokio::test]
    async fn test_missing_dir_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("nope"));
        assert!(store.list().await.unwrap().is_empty());
    }
}
