use async_trait::async_trait;
use dashmap::DashMap;

use super::{completed_key, snapshot_key, ArtifactError, ArtifactRef, ArtifactResult, ArtifactStore};
use crate::models::{ListEntry, Username};

#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    snapshots: DashMap<Username, Vec<ListEntry>>,
    completed: DashMap<Username, serde_json::Value>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_snapshot(&self, username: &Username) -> bool {
        self.snapshots.contains_key(username)
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    fn reference(username: &Username) -> ArtifactRef {
        let key = completed_key(username);
        ArtifactRef {
            location: format!("memory://{key}"),
            key,
        }
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put_snapshot(&self, username: &Username, entries: &[ListEntry]) -> ArtifactResult<()> {
        self.snapshots.insert(username.clone(), entries.to_vec());
        Ok(())
    }

    async fn load_snapshot(&self, username: &Username) -> ArtifactResult<Vec<ListEntry>> {
        self.snapshots
            .get(username)
            .map(|entries| entries.value().clone())
            .ok_or_else(|| ArtifactError::not_found(snapshot_key(username)))
    }

    async fn delete_snapshot(&self, username: &Username) -> ArtifactResult<()> {
        self.snapshots.remove(username);
        Ok(())
    }

    async fn put_completed(
        &self,
        username: &Username,
        result: &serde_json::Value,
    ) -> ArtifactResult<ArtifactRef> {
        self.completed.insert(username.clone(), result.clone());
        Ok(Self::reference(username))
    }

    async fn get_completed(&self, username: &Username) -> ArtifactResult<Option<serde_json::Value>> {
        Ok(self.completed.get(username).map(|value| value.value().clone()))
    }

    async fn completed_exists(&self, username: &Username) -> ArtifactResult<Option<ArtifactRef>> {
        Ok(self
            .completed
            .contains_key(username)
            .then(|| Self::reference(username)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ListStatus;
    use serde_json::json;

    #[tokio::test]
    async fn test_snapshot_lifecycle() {
        let store = InMemoryArtifactStore::new();
        let user = Username::new("dana");
        let entries = vec![ListEntry::new(4u64, ListStatus::Completed, Some(8))];

        assert!(matches!(
            store.load_snapshot(&user).await,
            Err(ArtifactError::NotFound { .. })
        ));
        store.put_snapshot(&user, &entries).await.unwrap();
        assert_eq!(store.load_snapshot(&user).await.unwrap(), entries);

        store.delete_snapshot(&user).await.unwrap();
        store.delete_snapshot(&user).await.unwrap();
        assert!(!store.has_snapshot(&user));
    }

    #[tokio::test]
    async fn test_completed_reference() {
        let store = InMemoryArtifactStore::new();
        let user = Username::new("dana");
        assert_eq!(store.completed_exists(&user).await.unwrap(), None);

        let reference = store.put_completed(&user, &json!({"score": 3})).await.unwrap();
        assert_eq!(reference.key, "completed-dana.json");
        assert_eq!(store.completed_exists(&user).await.unwrap(), Some(reference));
        assert_eq!(
            store.get_completed(&user).await.unwrap(),
            Some(json!({"score": 3}))
        );
    }
}
