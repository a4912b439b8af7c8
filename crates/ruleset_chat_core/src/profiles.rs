//! crates/ruleset_chat_core/src/profiles.rs
//!
//! The profile registry. A profile lives in two independently durable stores:
//! the registry row in the database and the ruleset document in the
//! `RulesetStore`. Creation writes the document first, then the row, and
//! deletes the document again if the row cannot be written.

use crate::domain::{Profile, ProfileSummary, Ruleset};
use crate::ports::{DatabaseService, PortError, PortResult, RulesetStore};
use crate::sessions::SessionRegistry;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// The result of `ProfileRegistry::create`: the profile and the chat log opened for it.
#[derive(Debug, Clone)]
pub struct CreatedProfile {
    pub profile: Profile,
    pub chatlog_id: i64,
}

pub struct ProfileRegistry {
    db: Arc<dyn DatabaseService>,
    rulesets: Arc<dyn RulesetStore>,
    sessions: Arc<SessionRegistry>,
}

impl ProfileRegistry {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        rulesets: Arc<dyn RulesetStore>,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            db,
            rulesets,
            sessions,
        }
    }

    /// Creates a profile with its ruleset, then opens a first chat log for it.
    pub async fn create(
        &self,
        user_id: Uuid,
        profile_name: &str,
        model: &str,
        ruleset: &Ruleset,
    ) -> PortResult<CreatedProfile> {
        let profile_name = profile_name.trim();
        let model = model.trim();
        if profile_name.is_empty() {
            return Err(PortError::Validation("profile_name must not be empty".to_string()));
        }
        if model.is_empty() {
            return Err(PortError::Validation("model must not be empty".to_string()));
        }

        let profile_id = self.db.reserve_profile_id(user_id).await?;
        self.rulesets.put(user_id, profile_id, ruleset).await?;

        let profile = match self
            .db
            .insert_profile(user_id, profile_id, profile_name, model)
            .await
        {
            Ok(profile) => profile,
            Err(e) => {
                warn!(
                    "Registry write for profile {} of user {} failed, removing its ruleset: {}",
                    profile_id, user_id, e
                );
                if let Err(cleanup) = self.rulesets.delete(user_id, profile_id).await {
                    error!(
                        "Orphaned ruleset {}/{} left behind: {}",
                        user_id, profile_id, cleanup
                    );
                }
                return Err(e);
            }
        };
        info!("Created profile {} for user {}", profile_id, user_id);

        let session = self.sessions.create(user_id, profile_id).await?;
        Ok(CreatedProfile {
            profile,
            chatlog_id: session.chatlog_id,
        })
    }

    /// Returns the profile together with its ruleset document.
    pub async fn fetch(&self, user_id: Uuid, profile_id: i64) -> PortResult<(Profile, Ruleset)> {
        let profile = self.db.get_profile(user_id, profile_id).await?;
        let ruleset = match self.rulesets.get(user_id, profile_id).await {
            Ok(ruleset) => ruleset,
            Err(PortError::NotFound(msg)) => {
                warn!(
                    "Profile {} of user {} has no ruleset document",
                    profile_id, user_id
                );
                return Err(PortError::NotFound(msg));
            }
            Err(e) => return Err(e),
        };
        Ok((profile, ruleset))
    }

    pub async fn list(&self, user_id: Uuid) -> PortResult<Vec<ProfileSummary>> {
        self.db.list_profiles(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryDatabase, InMemoryRulesetStore};
    use serde_json::json;

    struct Fixture {
        db: Arc<InMemoryDatabase>,
        rulesets: Arc<InMemoryRulesetStore>,
        sessions: Arc<SessionRegistry>,
        registry: ProfileRegistry,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(InMemoryDatabase::new());
        let rulesets = Arc::new(InMemoryRulesetStore::new());
        let sessions = Arc::new(SessionRegistry::new(db.clone()));
        let registry = ProfileRegistry::new(db.clone(), rulesets.clone(), sessions.clone());
        Fixture {
            db,
            rulesets,
            sessions,
            registry,
        }
    }

    #[tokio::test]
    async fn fetch_returns_the_submitted_ruleset() {
        let f = fixture();
        let user = Uuid::new_v4();
        let ruleset = json!({
            "UseCase": "coding-assistance",
            "Rules": ["answer in Rust", {"nested": [1, 2.5, null, true]}]
        });

        let created = f
            .registry
            .create(user, "Rustacean", "gpt-4o", &ruleset)
            .await
            .unwrap();
        let (profile, fetched) = f
            .registry
            .fetch(user, created.profile.profile_id)
            .await
            .unwrap();

        assert_eq!(fetched, ruleset);
        assert_eq!(profile.model, "gpt-4o");
        assert_eq!(profile.profile_name, "Rustacean");
    }

    #[tokio::test]
    async fn ids_are_sequential_per_user() {
        let f = fixture();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        for expected in 0..3 {
            let created = f
                .registry
                .create(alice, &format!("p{}", expected), "m", &json!({}))
                .await
                .unwrap();
            assert_eq!(created.profile.profile_id, expected);
        }
        let created = f.registry.create(bob, "first", "m", &json!({})).await.unwrap();
        assert_eq!(created.profile.profile_id, 0);

        let listed: Vec<i64> = f
            .registry
            .list(alice)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.profile_id)
            .collect();
        assert_eq!(listed, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn create_opens_a_listed_session() {
        let f = fixture();
        let user = Uuid::new_v4();
        let created = f.registry.create(user, "p", "m", &json!([])).await.unwrap();

        let listed = f.sessions.list(user, created.profile.profile_id).await.unwrap();
        assert_eq!(listed, vec![created.chatlog_id]);
    }

    #[tokio::test]
    async fn empty_name_is_rejected_before_any_write() {
        let f = fixture();
        let err = f
            .registry
            .create(Uuid::new_v4(), "   ", "m", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Validation(_)));
        assert!(f.rulesets.is_empty());
        assert_eq!(f.db.profile_count(), 0);
    }

    #[tokio::test]
    async fn failed_registry_write_removes_the_ruleset() {
        let f = fixture();
        let user = Uuid::new_v4();
        f.db.fail_profile_inserts(true);

        let err = f
            .registry
            .create(user, "p", "m", &json!({"a": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Storage(_)));
        assert!(f.rulesets.is_empty());
        assert_eq!(f.db.profile_count(), 0);

        f.db.fail_profile_inserts(false);
        let created = f.registry.create(user, "p", "m", &json!({})).await.unwrap();
        assert!(f.rulesets.contains(user, created.profile.profile_id));
    }

    #[tokio::test]
    async fn orphaned_profile_reads_as_not_found() {
        let f = fixture();
        let user = Uuid::new_v4();
        let created = f.registry.create(user, "p", "m", &json!({})).await.unwrap();
        f.rulesets.remove_silently(user, created.profile.profile_id);

        let err = f
            .registry
            .fetch(user, created.profile.profile_id)
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }

    #[tokio::test]
    async fn concurrent_creates_get_distinct_ids() {
        let f = fixture();
        let user = Uuid::new_v4();
        let registry = Arc::new(f.registry);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry
                        .create(user, &format!("p{}", i), "m", &json!({ "i": i }))
                        .await
                })
            })
            .collect();
        let mut ids = Vec::new();
        for handle in futures::future::join_all(handles).await {
            ids.push(handle.unwrap().unwrap().profile.profile_id);
        }
        ids.sort_unstable();
        assert_eq!(ids, (0..8).collect::<Vec<_>>());
    }
}
