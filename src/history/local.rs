use async_trait::async_trait;
use log::debug;
use std::io::ErrorKind;
use std::path::{ Path, PathBuf };
use tokio::fs;
use uuid::Uuid;
use crate::history::{ HistoryBackend, StorageError };

/// One JSON file per session under a directory.
pub struct LocalHistoryBackend {
    dir: PathBuf,
}

impl LocalHistoryBackend {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl HistoryBackend for LocalHistoryBackend {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(self.dir.join(key)).await {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &str, body: Vec<u8>) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir).await?;
        let target = self.dir.join(key);
        let staging = self.dir.join(format!(".{}.{}.tmp", key, Uuid::new_v4()));

        if let Err(e) = fs::write(&staging, &body).await {
            let _ = fs::remove_file(&staging).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&staging, &target).await {
            let _ = fs::remove_file(&staging).await;
            return Err(e.into());
        }
        debug!("Wrote {} bytes to {}", body.len(), target.display());
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>, StorageError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(".json") && !name.starts_with('.') {
                    keys.push(name.to_string());
                }
            }
        }
        Ok(keys)
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ConversationStore;
    use crate::models::chat::Turn;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_backend() -> (LocalHistoryBackend, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let backend = LocalHistoryBackend::new(temp_dir.path().join("memory"));
        (backend, temp_dir)
    }

    #[tokio::test]
    async fn read_missing_file_is_none() {
        let (backend, _temp) = create_backend();
        assert!(backend.read("nobody.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn write_creates_directory_and_file() {
        let (backend, _temp) = create_backend();
        backend.write("s1.json", b"[]".to_vec()).await.unwrap();

        let path = backend.dir().join("s1.json");
        assert!(path.exists());
        assert_eq!(std::fs::read(path).unwrap(), b"[]");
    }

    #[tokio::test]
    async fn write_leaves_no_staging_files_behind() {
        let (backend, _temp) = create_backend();
        backend.write("s1.json", b"[1]".to_vec()).await.unwrap();
        backend.write("s1.json", b"[2]".to_vec()).await.unwrap();

        let names: Vec<_> = std::fs
            ::read_dir(backend.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["s1.json".to_string()]);
        assert_eq!(backend.read("s1.json").await.unwrap().unwrap(), b"[2]");
    }

    #[tokio::test]
    async fn list_keys_only_returns_json_documents() {
        let (backend, _temp) = create_backend();
        assert!(backend.list_keys().await.unwrap().is_empty());

        backend.write("a.json", b"[]".to_vec()).await.unwrap();
        backend.write("b.json", b"[]".to_vec()).await.unwrap();
        std::fs::write(backend.dir().join("notes.txt"), "x").unwrap();
        std::fs::create_dir(backend.dir().join("nested.json")).unwrap();

        let mut keys = backend.list_keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a.json".to_string(), "b.json".to_string()]);
    }

    #[tokio::test]
    async fn store_round_trips_through_files() {
        let (backend, _temp) = create_backend();
        let dir = backend.dir().to_path_buf();
        let store = ConversationStore::new(Arc::new(backend));
        let turns = vec![Turn::user("Hello"), Turn::assistant("Héllo back, ünïcode kept")];

        store.save("session-1", &turns).await.unwrap();

        assert_eq!(store.load("session-1").await.unwrap(), turns);
        let on_disk = std::fs::read_to_string(dir.join("session-1.json")).unwrap();
        assert!(on_disk.contains("\"role\": \"user\""));
        assert!(on_disk.contains("ünïcode"));
    }
}
