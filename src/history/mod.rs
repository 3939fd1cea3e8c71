mod local;
mod locks;
mod memory;
mod redis;
mod s3;

pub use local::LocalHistoryBackend;
pub use locks::{ SessionGuard, SessionLocks };
pub use memory::MemoryHistoryBackend;
pub use redis::RedisHistoryBackend;
pub use s3::S3HistoryBackend;

use async_trait::async_trait;
use log::{ info, warn };
use std::sync::Arc;
use thiserror::Error;
use crate::cli::Args;
use crate::models::chat::{ SessionSummary, Turn };

const DOCUMENT_SUFFIX: &str = ".json";
const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("malformed conversation document '{key}': {source}")]
    MalformedDocument {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid session id '{0}'")]
    InvalidSessionId(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Unavailable(err.to_string())
    }
}

/// Whole-object storage keyed by document name.
#[async_trait]
pub trait HistoryBackend: Send + Sync {
    /// Returns `None` when nothing is stored under `key`.
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Replaces the object under `key`. Readers see either the old or the new body.
    async fn write(&self, key: &str, body: Vec<u8>) -> Result<(), StorageError>;

    /// Every document key currently held by the backend.
    async fn list_keys(&self) -> Result<Vec<String>, StorageError>;

    fn name(&self) -> &'static str;
}

pub fn validate_session_id(session_id: &str) -> Result<(), StorageError> {
    let valid = !session_id.is_empty() &&
        session_id.len() <= MAX_SESSION_ID_LEN &&
        session_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidSessionId(session_id.to_string()))
    }
}

pub fn document_key(session_id: &str) -> String {
    format!("{}{}", session_id, DOCUMENT_SUFFIX)
}

pub fn session_id_from_key(key: &str) -> Option<&str> {
    key.strip_suffix(DOCUMENT_SUFFIX).filter(|id| validate_session_id(id).is_ok())
}

/// Conversation transcripts on top of any [`HistoryBackend`].
#[derive(Clone)]
pub struct ConversationStore {
    backend: Arc<dyn HistoryBackend>,
}

impl ConversationStore {
    pub fn new(backend: Arc<dyn HistoryBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn load(&self, session_id: &str) -> Result<Vec<Turn>, StorageError> {
        validate_session_id(session_id)?;
        let key = document_key(session_id);
        match self.backend.read(&key).await? {
            Some(body) => decode_turns(&key, &body),
            None => Ok(Vec::new()),
        }
    }

    pub async fn save(&self, session_id: &str, turns: &[Turn]) -> Result<(), StorageError> {
        validate_session_id(session_id)?;
        let body = serde_json
            ::to_vec_pretty(turns)
            .map_err(|e| StorageError::Unavailable(format!("failed to encode transcript: {}", e)))?;
        self.backend.write(&document_key(session_id), body).await
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, StorageError> {
        let mut keys = self.backend.list_keys().await?;
        keys.sort();

        let mut sessions = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(session_id) = session_id_from_key(&key) else {
                continue;
            };
            let Some(body) = self.backend.read(&key).await? else {
                continue;
            };
            match decode_turns(&key, &body) {
                Ok(turns) => {
                    sessions.push(SessionSummary {
                        session_id: session_id.to_string(),
                        turn_count: turns.len(),
                        last_turn_content: turns.last().map(|t| t.content.clone()),
                    });
                }
                Err(e) => warn!("Skipping unreadable session document: {}", e),
            }
        }
        Ok(sessions)
    }
}

fn decode_turns(key: &str, body: &[u8]) -> Result<Vec<Turn>, StorageError> {
    serde_json::from_slice(body).map_err(|source| StorageError::MalformedDocument {
        key: key.to_string(),
        source,
    })
}

pub async fn create_history_backend(
    args: &Args
) -> Result<Arc<dyn HistoryBackend>, StorageError> {
    match args.history_backend_type().as_str() {
        "local" => Ok(Arc::new(LocalHistoryBackend::new(&args.memory_dir))),
        "memory" => Ok(Arc::new(MemoryHistoryBackend::new())),
        "s3" => {
            if args.s3_bucket.trim().is_empty() {
                return Err(
                    StorageError::Unavailable("S3_BUCKET is required for the s3 history store".into())
                );
            }
            let store = S3HistoryBackend::from_env(&args.s3_bucket, &args.s3_prefix).await;
            Ok(Arc::new(store))
        }
        "redis" => {
            let store = RedisHistoryBackend::new(
                &args.history_host,
                &args.history_redis_prefix,
                args.history_redis_scan_count
            )?;
            Ok(Arc::new(store))
        }
        other => Err(StorageError::Unavailable(format!("Unsupported history store type: {}", other))),
    }
}

pub async fn initialize_history_backend(
    args: &Args
) -> Result<Arc<dyn HistoryBackend>, StorageError> {
    let backend = create_history_backend(args).await?;
    match backend.name() {
        "local" => info!("Conversations will be stored in local directory: {}", args.memory_dir),
        "s3" => info!("Conversations will be stored in S3 bucket: {}", args.s3_bucket),
        "redis" => info!("Conversations will be stored in redis at {}", args.history_host),
        other => warn!("Conversations will be stored in the '{}' backend and lost on exit", other),
    }
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::Role;

    fn store() -> ConversationStore {
        ConversationStore::new(Arc::new(MemoryHistoryBackend::new()))
    }

    #[tokio::test]
    async fn missing_session_loads_empty() {
        let turns = store().load("never-saved").await.unwrap();
        assert!(turns.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_returns_same_turns() {
        let store = store();
        let turns = vec![Turn::user("Hello"), Turn::assistant("Hi there")];
        store.save("abc", &turns).await.unwrap();

        assert_eq!(store.load("abc").await.unwrap(), turns);
    }

    #[tokio::test]
    async fn save_overwrites_previous_sequence() {
        let store = store();
        store.save("abc", &[Turn::user("one")]).await.unwrap();
        store.save("abc", &[Turn::user("two"), Turn::assistant("three")]).await.unwrap();

        let loaded = store.load("abc").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].content, "two");
    }

    #[tokio::test]
    async fn malformed_document_is_an_error() {
        let backend = Arc::new(MemoryHistoryBackend::new());
        backend.write("broken.json", b"{not json".to_vec()).await.unwrap();
        let store = ConversationStore::new(backend);

        let err = store.load("broken").await.unwrap_err();
        assert!(matches!(err, StorageError::MalformedDocument { .. }));
    }

    #[tokio::test]
    async fn documents_without_timestamps_are_accepted() {
        let backend = Arc::new(MemoryHistoryBackend::new());
        let legacy = br#"[{"role":"user","content":"hi"},{"role":"assistant","content":"yo"}]"#;
        backend.write("legacy.json", legacy.to_vec()).await.unwrap();
        let store = ConversationStore::new(backend);

        let turns = store.load("legacy").await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].role, Role::Assistant);
        assert!(turns[0].timestamp.is_none());
    }

    #[tokio::test]
    async fn list_sessions_summarizes_each_document() {
        let backend = Arc::new(MemoryHistoryBackend::new());
        let store = ConversationStore::new(backend.clone());
        store.save("b-session", &[Turn::user("q"), Turn::assistant("a")]).await.unwrap();
        store.save("a-session", &[Turn::user("only")]).await.unwrap();
        backend.write("junk.json", b"[[[".to_vec()).await.unwrap();
        backend.write("notes.txt", b"[]".to_vec()).await.unwrap();

        let sessions = store.list_sessions().await.unwrap();
        assert_eq!(
            sessions,
            vec![
                SessionSummary {
                    session_id: "a-session".into(),
                    turn_count: 1,
                    last_turn_content: Some("only".into()),
                },
                SessionSummary {
                    session_id: "b-session".into(),
                    turn_count: 2,
                    last_turn_content: Some("a".into()),
                }
            ]
        );
    }

    #[tokio::test]
    async fn path_like_session_ids_are_rejected() {
        let store = store();
        for bad in ["", "../etc/passwd", "a/b", "with space", "dot.dot"] {
            let err = store.load(bad).await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidSessionId(_)), "accepted {:?}", bad);
        }
        assert!(validate_session_id(&"x".repeat(MAX_SESSION_ID_LEN + 1)).is_err());
    }

    #[test]
    fn keys_map_back_to_session_ids() {
        let key = document_key("6f1c2a4e-0d4b-4a53-9a4c-1c2f0e9b7d11");
        assert_eq!(session_id_from_key(&key), Some("6f1c2a4e-0d4b-4a53-9a4c-1c2f0e9b7d11"));
        assert_eq!(session_id_from_key("readme.md"), None);
        assert_eq!(session_id_from_key(".tmp.json"), None);
    }
}
