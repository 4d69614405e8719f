//! Conversation window persistence.
//!
//! Windows are mirrored into a key → window map with expiry so history
//! survives restarts. Two implementations:
//! - [`MemoryWindowStore`]: in-process map, used when persistence is off
//! - [`FileWindowStore`]: one JSON file per conversation, atomic writes

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::models::Message;
use crate::error::Result;

/// Default TTL for stored windows.
pub const DEFAULT_WINDOW_TTL_SECS: u64 = 24 * 3600;

/// Key → window map with expiry.
pub trait WindowStore: Send + Sync {
    /// Stored messages for a conversation, `None` if missing or expired.
    fn load(&self, conversation_id: &str) -> Option<Vec<Message>>;

    /// Replace the stored messages for a conversation.
    ///
    /// # Errors
    ///
    /// Returns error if the entry cannot be written.
    fn save(&self, conversation_id: &str, messages: &[Message]) -> Result<()>;

    /// Drop a conversation.
    ///
    /// # Errors
    ///
    /// Returns error if the entry exists but cannot be removed.
    fn remove(&self, conversation_id: &str) -> Result<()>;

    /// Drop every expired entry; returns how many were removed.
    fn purge_expired(&self) -> usize;
}

/// Stored form of one window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowEntry {
    pub conversation_id: String,
    pub messages: Vec<Message>,
    pub cached_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl WindowEntry {
    #[must_use]
    pub fn new(conversation_id: &str, messages: &[Message], ttl: Duration) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            messages: messages.to_vec(),
            cached_at: Utc::now(),
            ttl_seconds: ttl.as_secs(),
        }
    }

    /// Age of the entry.
    #[must_use]
    pub fn age(&self) -> Duration {
        let age = Utc::now() - self.cached_at;
        Duration::from_millis(u64::try_from(age.num_milliseconds().max(0)).unwrap_or(0))
    }

    /// Whether the entry is still within its TTL.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.age() <= Duration::from_secs(self.ttl_seconds)
    }
}

// =============================================================================
// Memory store
// =============================================================================

/// In-process store; contents are lost on exit.
#[derive(Debug)]
pub struct MemoryWindowStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, WindowEntry>>,
}

impl MemoryWindowStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryWindowStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_WINDOW_TTL_SECS))
    }
}

impl WindowStore for MemoryWindowStore {
    fn load(&self, conversation_id: &str) -> Option<Vec<Message>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(conversation_id) {
            Some(entry) if entry.is_fresh() => Some(entry.messages.clone()),
            Some(_) => {
                entries.remove(conversation_id);
                None
            }
            None => None,
        }
    }

    fn save(&self, conversation_id: &str, messages: &[Message]) -> Result<()> {
        let entry = WindowEntry::new(conversation_id, messages, self.ttl);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(conversation_id.to_string(), entry);
        Ok(())
    }

    fn remove(&self, conversation_id: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(conversation_id);
        Ok(())
    }

    fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh());
        before - entries.len()
    }
}

// =============================================================================
// File store
// =============================================================================

/// One JSON file per conversation under a directory.
#[derive(Debug, Clone)]
pub struct FileWindowStore {
    dir: PathBuf,
    ttl: Duration,
}

impl FileWindowStore {
    /// Create a store rooted at `dir`, creating it if needed.
    #[must_use]
    pub fn new(dir: PathBuf, ttl: Duration) -> Self {
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!("Failed to create window store dir: {}", e);
        }
        Self { dir, ttl }
    }

    /// File for a conversation. Ids are hashed so any string is a safe key.
    #[must_use]
    pub fn entry_path(&self, conversation_id: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(conversation_id.as_bytes()));
        self.dir.join(format!("{}.json", &digest[..24]))
    }

    fn read_entry(&self, path: &Path) -> Option<WindowEntry> {
        let content = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }
}

impl WindowStore for FileWindowStore {
    fn load(&self, conversation_id: &str) -> Option<Vec<Message>> {
        let path = self.entry_path(conversation_id);
        let entry = self.read_entry(&path)?;
        if entry.conversation_id != conversation_id {
            return None;
        }
        if !entry.is_fresh() {
            tracing::debug!(conversation = conversation_id, "Dropping expired window");
            let _ = std::fs::remove_file(&path);
            return None;
        }
        Some(entry.messages)
    }

    fn save(&self, conversation_id: &str, messages: &[Message]) -> Result<()> {
        let entry = WindowEntry::new(conversation_id, messages, self.ttl);
        write_json(&self.entry_path(conversation_id), &entry)
    }

    fn remove(&self, conversation_id: &str) -> Result<()> {
        let path = self.entry_path(conversation_id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    fn purge_expired(&self) -> usize {
        let Ok(dir) = std::fs::read_dir(&self.dir) else {
            return 0;
        };
        let mut removed = 0;
        for path in dir.filter_map(std::result::Result::ok).map(|e| e.path()) {
            let is_entry = path.extension().is_some_and(|ext| ext == "json")
                && !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'));
            if !is_entry || self.read_entry(&path).is_some_and(|entry| entry.is_fresh()) {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => tracing::debug!(path = %path.display(), error = %e, "Failed to purge window"),
            }
        }
        removed
    }
}

// =============================================================================
// Atomic writes
// =============================================================================

/// Serialize `data` to `path` atomically, creating parent directories.
///
/// # Errors
///
/// Returns error on serialization or filesystem failure.
pub fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string(data)?;
    write_atomic(path, content.as_bytes())?;
    Ok(())
}

/// Per-process sequence so concurrent writers never share a temp file.
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Write bytes using temp file + rename.
fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let temp_path = parent.join(format!(
        ".{}.tmp.{}.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("entry"),
        std::process::id(),
        WRITE_SEQ.fetch_add(1, Ordering::Relaxed)
    ));

    {
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }

    std::fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    fn sample() -> Vec<Message> {
        vec![Message::system("be brief"), Message::user("hi"), Message::assistant("hello")]
    }

    #[test]
    fn memory_store_roundtrip_and_remove() {
        let store = MemoryWindowStore::default();
        store.save("c1", &sample()).unwrap();
        assert_eq!(store.load("c1").unwrap().len(), 3);
        store.remove("c1").unwrap();
        assert!(store.load("c1").is_none());
    }

    #[test]
    fn memory_store_expires_entries() {
        let store = MemoryWindowStore::new(Duration::ZERO);
        store
            .entries
            .lock()
            .unwrap()
            .insert("old".to_string(), WindowEntry {
                conversation_id: "old".to_string(),
                messages: sample(),
                cached_at: Utc::now() - ChronoDuration::seconds(10),
                ttl_seconds: 0,
            });
        assert!(store.load("old").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let ttl = Duration::from_secs(60);
        FileWindowStore::new(dir.path().to_path_buf(), ttl)
            .save("chat:42", &sample())
            .unwrap();

        let reopened = FileWindowStore::new(dir.path().to_path_buf(), ttl);
        let messages = reopened.load("chat:42").unwrap();
        assert_eq!(messages, sample());
        assert!(reopened.load("chat:43").is_none());
    }

    #[test]
    fn file_store_drops_expired_entries() {
        let dir = TempDir::new().unwrap();
        let store = FileWindowStore::new(dir.path().to_path_buf(), Duration::from_secs(60));
        let path = store.entry_path("stale");
        let entry = WindowEntry {
            conversation_id: "stale".to_string(),
            messages: sample(),
            cached_at: Utc::now() - ChronoDuration::seconds(120),
            ttl_seconds: 60,
        };
        write_json(&path, &entry).unwrap();

        assert!(store.load("stale").is_none());
        assert!(!path.exists());
    }

    #[test]
    fn corrupt_file_reads_as_missing() {
        let dir = TempDir::new().unwrap();
        let store = FileWindowStore::new(dir.path().to_path_buf(), Duration::from_secs(60));
        std::fs::write(store.entry_path("bad"), "{not json").unwrap();
        assert!(store.load("bad").is_none());
    }

    #[test]
    fn purge_drops_only_expired_entries() {
        let dir = TempDir::new().unwrap();
        let store = FileWindowStore::new(dir.path().to_path_buf(), Duration::from_secs(60));
        store.save("fresh", &sample()).unwrap();
        let stale = WindowEntry {
            conversation_id: "stale".to_string(),
            messages: sample(),
            cached_at: Utc::now() - ChronoDuration::seconds(120),
            ttl_seconds: 60,
        };
        write_json(&store.entry_path("stale"), &stale).unwrap();

        assert_eq!(store.purge_expired(), 1);
        assert!(store.load("fresh").is_some());
        assert!(!store.entry_path("stale").exists());

        let memory = MemoryWindowStore::new(Duration::ZERO);
        memory.save("gone", &sample()).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(memory.purge_expired(), 1);
        assert!(memory.is_empty());
    }

    #[test]
    fn concurrent_saves_of_one_conversation_all_land() {
        let dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(FileWindowStore::new(dir.path().to_path_buf(), Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || store.save("shared", &[Message::user(format!("turn {i}"))]))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(store.load("shared").unwrap().len(), 1);
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/state.json");
        write_json(&path, &serde_json::json!({"ok": true})).unwrap();
        let names: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["state.json"]);
    }
}
