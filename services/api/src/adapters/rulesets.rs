//! services/api/src/adapters/rulesets.rs
//!
//! Stores each profile's ruleset as a JSON file at `<root>/<user_id>/<profile_id>.json`.
//! User ids are UUIDs, so a key can never collide with another user's directory.

use async_trait::async_trait;
use ruleset_chat_core::domain::Ruleset;
use ruleset_chat_core::ports::{PortError, PortResult, RulesetStore};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct FsRulesetStore {
    root: PathBuf,
}

impl FsRulesetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn user_dir(&self, user_id: Uuid) -> PathBuf {
        self.root.join(user_id.hyphenated().to_string())
    }

    fn path_for(&self, user_id: Uuid, profile_id: i64) -> PathBuf {
        self.user_dir(user_id).join(format!("{}.json", profile_id))
    }

    async fn write_new(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        let written = async {
            file.write_all(bytes).await?;
            file.sync_all().await
        }
        .await;
        if written.is_err() {
            let _ = fs::remove_file(path).await;
        }
        written
    }

    /// Flushes a directory's entries so a new file or subdirectory survives a crash.
    async fn sync_dir(dir: &Path) -> std::io::Result<()> {
        fs::File::open(dir).await?.sync_all().await
    }
}

#[async_trait]
impl RulesetStore for FsRulesetStore {
    async fn put(&self, user_id: Uuid, profile_id: i64, ruleset: &Ruleset) -> PortResult<()> {
        let bytes = serde_json::to_vec_pretty(ruleset)
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        fs::create_dir_all(self.user_dir(user_id))
            .await
            .map_err(|e| PortError::Storage(e.to_string()))?;

        let path = self.path_for(user_id, profile_id);
        Self::write_new(&path, &bytes).await.map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => PortError::Conflict(format!(
                "Ruleset for profile {} of user {} already exists",
                profile_id, user_id
            )),
            _ => PortError::Storage(format!("{}: {}", path.display(), e)),
        })?;

        // The user directory may be new too, so its parent gets flushed as well.
        for dir in [self.user_dir(user_id), self.root.clone()] {
            Self::sync_dir(&dir)
                .await
                .map_err(|e| PortError::Storage(format!("{}: {}", dir.display(), e)))?;
        }
        Ok(())
    }

    async fn get(&self, user_id: Uuid, profile_id: i64) -> PortResult<Ruleset> {
        let path = self.path_for(user_id, profile_id);
        let bytes = fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => PortError::NotFound(format!(
                "Ruleset for profile {} of user {} not found",
                profile_id, user_id
            )),
            _ => PortError::Storage(format!("{}: {}", path.display(), e)),
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| PortError::Integrity(format!("{} is not valid JSON: {}", path.display(), e)))
    }

    async fn delete(&self, user_id: Uuid, profile_id: i64) -> PortResult<()> {
        let path = self.path_for(user_id, profile_id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PortError::Storage(format!("{}: {}", path.display(), e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_then_get_round_trips_the_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRulesetStore::new(dir.path());
        let user = Uuid::new_v4();
        let ruleset = json!({"UseCase": "coding-assistance", "limits": [1, 2, 3]});

        store.put(user, 0, &ruleset).await.unwrap();
        assert_eq!(store.get(user, 0).await.unwrap(), ruleset);
        assert!(dir
            .path()
            .join(user.to_string())
            .join("0.json")
            .exists());
    }

    #[tokio::test]
    async fn put_creates_and_flushes_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("rulesets");
        let store = FsRulesetStore::new(&root);
        let user = Uuid::new_v4();

        store.put(user, 0, &json!({"v": 1})).await.unwrap();
        assert!(root.join(user.to_string()).join("0.json").exists());
        FsRulesetStore::sync_dir(&root.join(user.to_string())).await.unwrap();
        assert_eq!(store.get(user, 0).await.unwrap(), json!({"v": 1}));
    }

    #[tokio::test]
    async fn existing_documents_are_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRulesetStore::new(dir.path());
        let user = Uuid::new_v4();

        store.put(user, 3, &json!({"v": 1})).await.unwrap();
        let err = store.put(user, 3, &json!({"v": 2})).await.unwrap_err();
        assert!(matches!(err, PortError::Conflict(_)));
        assert_eq!(store.get(user, 3).await.unwrap(), json!({"v": 1}));
    }

    #[tokio::test]
    async fn missing_and_deleted_documents_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRulesetStore::new(dir.path());
        let user = Uuid::new_v4();

        assert!(matches!(store.get(user, 0).await, Err(PortError::NotFound(_))));

        store.put(user, 0, &json!(null)).await.unwrap();
        store.delete(user, 0).await.unwrap();
        store.delete(user, 0).await.unwrap();
        assert!(matches!(store.get(user, 0).await, Err(PortError::NotFound(_))));
    }

    #[tokio::test]
    async fn keys_do_not_collide_across_users() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRulesetStore::new(dir.path());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        store.put(a, 1, &json!("a")).await.unwrap();
        store.put(b, 1, &json!("b")).await.unwrap();
        assert_eq!(store.get(a, 1).await.unwrap(), json!("a"));
        assert_eq!(store.get(b, 1).await.unwrap(), json!("b"));
    }

    #[tokio::test]
    async fn corrupt_documents_are_integrity_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRulesetStore::new(dir.path());
        let user = Uuid::new_v4();
        std::fs::create_dir_all(dir.path().join(user.to_string())).unwrap();
        std::fs::write(dir.path().join(user.to_string()).join("0.json"), b"{oops").unwrap();

        assert!(matches!(store.get(user, 0).await, Err(PortError::Integrity(_))));
    }
}
