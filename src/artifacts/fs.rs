//! Directory-backed artifact store. Writes go to a temporary file that is
//! renamed into place, so readers never observe a partial artifact.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{completed_key, snapshot_key, ArtifactError, ArtifactRef, ArtifactResult, ArtifactStore};
use crate::models::{ListEntry, Username};

#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    async fn write(&self, key: &str, bytes: Vec<u8>) -> ArtifactResult<PathBuf> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| ArtifactError::io("create_dir", key, e))?;

        let target = self.path_for(key);
        let staging = self.path_for(&format!(".{key}.tmp"));
        tokio::fs::write(&staging, bytes)
            .await
            .map_err(|e| ArtifactError::io("write", key, e))?;
        tokio::fs::rename(&staging, &target)
            .await
            .map_err(|e| ArtifactError::io("rename", key, e))?;

        debug!(key, path = %target.display(), "Wrote artifact");
        Ok(target)
    }

    async fn read(&self, key: &str) -> ArtifactResult<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ArtifactError::io("read", key, e)),
        }
    }

    fn reference(&self, key: String) -> ArtifactRef {
        ArtifactRef {
            location: self.path_for(&key).display().to_string(),
            key,
        }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put_snapshot(&self, username: &Username, entries: &[ListEntry]) -> ArtifactResult<()> {
        let bytes = serde_json::to_vec(entries)?;
        self.write(&snapshot_key(username), bytes).await?;
        Ok(())
    }

    async fn load_snapshot(&self, username: &Username) -> ArtifactResult<Vec<ListEntry>> {
        let key = snapshot_key(username);
        let bytes = self
            .read(&key)
            .await?
            .ok_or_else(|| ArtifactError::not_found(key))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn delete_snapshot(&self, username: &Username) -> ArtifactResult<()> {
        let key = snapshot_key(username);
        match tokio::fs::remove_file(self.path_for(&key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ArtifactError::io("delete", key, e)),
        }
    }

    async fn put_completed(
        &self,
        username: &Username,
        result: &serde_json::Value,
    ) -> ArtifactResult<ArtifactRef> {
        let key = completed_key(username);
        self.write(&key, serde_json::to_vec_pretty(result)?).await?;
        Ok(self.reference(key))
    }

    async fn get_completed(&self, username: &Username) -> ArtifactResult<Option<serde_json::Value>> {
        match self.read(&completed_key(username)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn completed_exists(&self, username: &Username) -> ArtifactResult<Option<ArtifactRef>> {
        let key = completed_key(username);
        let exists = tokio::fs::try_exists(self.path_for(&key))
            .await
            .map_err(|e| ArtifactError::io("exists", key.as_str(), e))?;
        Ok(exists.then(|| self.reference(key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ListStatus;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_snapshot_round_trip_on_disk() {
        let dir = TempDir::new().unwrap();
        let store = FsArtifactStore::new(dir.path().join("artifacts"));
        let user = Username::new("Erin");
        let entries = vec![
            ListEntry::new(1u64, ListStatus::Completed, Some(9)),
            ListEntry::new(2u64, ListStatus::Dropped, None),
        ];

        store.put_snapshot(&user, &entries).await.unwrap();
        assert!(dir.path().join("artifacts/snapshot-erin.json").is_file());
        assert_eq!(store.load_snapshot(&user).await.unwrap(), entries);

        store.delete_snapshot(&user).await.unwrap();
        assert!(matches!(
            store.load_snapshot(&user).await,
            Err(ArtifactError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_completed_artifact_is_discoverable() {
        let dir = TempDir::new().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let user = Username::new("erin");

        assert!(store.completed_exists(&user).await.unwrap().is_none());
        assert!(store.get_completed(&user).await.unwrap().is_none());

        let reference = store.put_completed(&user, &json!({"bias": 0.4})).await.unwrap();
        assert_eq!(store.completed_exists(&user).await.unwrap(), Some(reference.clone()));
        assert!(reference.location.ends_with("completed-erin.json"));
        assert_eq!(
            store.get_completed(&user).await.unwrap(),
            Some(json!({"bias": 0.4}))
        );

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
