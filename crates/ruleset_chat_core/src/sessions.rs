//! crates/ruleset_chat_core/src/sessions.rs
//!
//! The session registry: chat logs bound to a `(user, profile)` pair.

use crate::domain::ChatSession;
use crate::ports::{DatabaseService, PortResult};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub struct SessionRegistry {
    db: Arc<dyn DatabaseService>,
}

impl SessionRegistry {
    pub fn new(db: Arc<dyn DatabaseService>) -> Self {
        Self { db }
    }

    /// Opens a new chat log. Fails with `NotFound` if the profile does not exist.
    pub async fn create(&self, user_id: Uuid, profile_id: i64) -> PortResult<ChatSession> {
        let session = self.db.create_chat_session(user_id, profile_id).await?;
        info!(
            "Created chat log {} for profile {} of user {}",
            session.chatlog_id, profile_id, user_id
        );
        Ok(session)
    }

    /// Chat log ids of one profile, oldest first.
    pub async fn list(&self, user_id: Uuid, profile_id: i64) -> PortResult<Vec<i64>> {
        // Unknown profiles are NotFound rather than an empty list.
        self.db.get_profile(user_id, profile_id).await?;
        self.db.list_chat_sessions(user_id, profile_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PortError;
    use crate::testing::InMemoryDatabase;

    #[tokio::test]
    async fn create_requires_an_existing_profile() {
        let db = Arc::new(InMemoryDatabase::new());
        let sessions = SessionRegistry::new(db.clone());
        let user = Uuid::new_v4();

        let err = sessions.create(user, 7).await.unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));

        db.insert_profile(user, 0, "coder", "gpt-4o").await.unwrap();
        let first = sessions.create(user, 0).await.unwrap();
        let second = sessions.create(user, 0).await.unwrap();
        assert!(second.chatlog_id > first.chatlog_id);
        assert_eq!(
            sessions.list(user, 0).await.unwrap(),
            vec![first.chatlog_id, second.chatlog_id]
        );
    }

    #[tokio::test]
    async fn sessions_are_scoped_to_their_owner() {
        let db = Arc::new(InMemoryDatabase::new());
        let sessions = SessionRegistry::new(db.clone());
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        db.insert_profile(owner, 0, "coder", "gpt-4o").await.unwrap();
        sessions.create(owner, 0).await.unwrap();

        assert!(matches!(
            sessions.create(other, 0).await,
            Err(PortError::NotFound(_))
        ));
        assert!(matches!(
            sessions.list(other, 0).await,
            Err(PortError::NotFound(_))
        ));
    }
}
