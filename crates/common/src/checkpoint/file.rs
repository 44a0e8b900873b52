//! File checkpoint backend
//!
//! One file per key under a directory. The filename is the SHA-256 hex
//! digest of the key so arbitrary session ids map to safe, collision-free
//! names. Writes go to a temporary sibling first, are flushed to disk, and
//! only then renamed over the target, so readers and restarts see either
//! the old or the new checkpoint.

use super::CheckpointBackend;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub struct FileBackend {
    directory: PathBuf,
}

impl FileBackend {
    /// Open (creating if needed) a checkpoint directory
    pub async fn new(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|e| AppError::Persistence {
                message: format!("cannot create {}: {}", directory.display(), e),
            })?;

        Ok(Self { directory })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        self.directory.join(format!("{}.json", digest))
    }
}

/// Write `value` to a fresh file and fsync it before returning
async fn write_synced(path: &Path, value: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(value.as_bytes()).await?;
    file.sync_all().await
}

#[async_trait]
impl CheckpointBackend for FileBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Persistence {
                message: format!("cannot read {}: {}", path.display(), e),
            }),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));

        if let Err(e) = write_synced(&tmp, value).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(AppError::Persistence {
                message: format!("cannot write {}: {}", tmp.display(), e),
            });
        }

        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(AppError::Persistence {
                message: format!("cannot replace {}: {}", path.display(), e),
            });
        }

        debug!(key, path = %path.display(), "Checkpoint written");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let meta = tokio::fs::metadata(&self.directory)
            .await
            .map_err(|e| AppError::Persistence {
                message: format!("checkpoint directory unavailable: {}", e),
            })?;

        if !meta.is_dir() {
            return Err(AppError::Persistence {
                message: format!("{} is not a directory", self.directory.display()),
            });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).await.unwrap();
        assert_eq!(backend.get("session:nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_replaces_previous_value() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).await.unwrap();

        backend.set("session:a", "first version, longer").await.unwrap();
        backend.set("session:a", "second").await.unwrap();

        assert_eq!(backend.get("session:a").await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_large_value_written_in_full() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).await.unwrap();
        let value = "turn ".repeat(200_000);

        assert_ok!(backend.set("session:big", &value).await);

        assert_eq!(assert_ok!(backend.get("session:big").await), Some(value));
    }

    #[tokio::test]
    async fn test_unwritable_directory_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("checkpoints");
        let backend = FileBackend::new(&root).await.unwrap();
        std::fs::remove_dir(&root).unwrap();

        let err = assert_err!(backend.set("session:a", "{}").await);

        assert!(matches!(err, AppError::Persistence { .. }));
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).await.unwrap();

        backend.set("session:a", "{}").await.unwrap();
        backend.set("session:b", "{}").await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| n.ends_with(".json")));
    }

    #[tokio::test]
    async fn test_keys_with_path_characters_stay_inside_directory() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).await.unwrap();

        backend.set("session:../../escape", "x").await.unwrap();
        assert_eq!(
            backend.get("session:../../escape").await.unwrap().as_deref(),
            Some("x")
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
