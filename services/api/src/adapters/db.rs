//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use ruleset_chat_core::domain::{
    ChatSession, Message, Profile, ProfileSummary, Sender, SessionContext, User, UserCredentials,
};
use ruleset_chat_core::ports::{DatabaseService, PortError, PortResult};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

//=========================================================================================
// Error Mapping
//=========================================================================================

fn storage(e: sqlx::Error) -> PortError {
    PortError::Storage(e.to_string())
}

/// Maps constraint violations on writes to their taxonomy kinds.
fn write_error(e: sqlx::Error, what: impl FnOnce() -> String) -> PortError {
    if let Some(db_err) = e.as_database_error() {
        if db_err.is_unique_violation() {
            return PortError::Conflict(format!("{} already exists", what()));
        }
        if db_err.is_foreign_key_violation() {
            return PortError::NotFound(format!("{} refers to a missing row", what()));
        }
    }
    storage(e)
}

fn not_found_or(e: sqlx::Error, what: impl FnOnce() -> String) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(format!("{} not found", what())),
        _ => storage(e),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    user_id: Uuid,
    username: String,
    email: String,
    hashed_password: String,
}
impl UserRecord {
    fn to_domain(self) -> UserCredentials {
        UserCredentials {
            user_id: self.user_id,
            username: self.username,
            email: self.email,
            hashed_password: self.hashed_password,
        }
    }
}

#[derive(FromRow)]
struct ProfileRecord {
    user_id: Uuid,
    profile_id: i64,
    profile_name: String,
    model: String,
}
impl ProfileRecord {
    fn to_domain(self) -> Profile {
        Profile {
            user_id: self.user_id,
            profile_id: self.profile_id,
            profile_name: self.profile_name,
            model: self.model,
        }
    }
}

#[derive(FromRow)]
struct ChatLogRecord {
    chatlog_id: i64,
    user_id: Uuid,
    profile_id: i64,
}
impl ChatLogRecord {
    fn to_domain(self) -> ChatSession {
        ChatSession {
            chatlog_id: self.chatlog_id,
            user_id: self.user_id,
            profile_id: self.profile_id,
        }
    }
}

#[derive(FromRow)]
struct SessionContextRecord {
    chatlog_id: i64,
    user_id: Uuid,
    profile_id: i64,
    model: String,
}

#[derive(FromRow)]
struct MessageRecord {
    chatlog_id: i64,
    message_id: i64,
    sender: String,
    content: String,
}
impl MessageRecord {
    fn to_domain(self) -> PortResult<Message> {
        let sender = self.sender.parse::<Sender>().map_err(PortError::Integrity)?;
        Ok(Message {
            chatlog_id: self.chatlog_id,
            message_id: self.message_id,
            sender,
            content: self.content,
        })
    }
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn create_user(
        &self,
        username: &str,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "INSERT INTO users (user_id, username, email, hashed_password) VALUES ($1, $2, $3, $4) \
             RETURNING user_id, username, email, hashed_password",
        )
        .bind(Uuid::new_v4())
        .bind(username)
        .bind(email)
        .bind(hashed_password)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| write_error(e, || format!("User {}", email)))?;
        Ok(record.to_domain().to_user())
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT user_id, username, email, hashed_password FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found_or(e, || format!("User {}", email)))?;
        Ok(record.to_domain())
    }

    async fn reserve_profile_id(&self, user_id: Uuid) -> PortResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO profile_sequences (user_id, next_profile_id) VALUES ($1, 1) \
             ON CONFLICT (user_id) DO UPDATE \
             SET next_profile_id = profile_sequences.next_profile_id + 1 \
             RETURNING next_profile_id - 1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| write_error(e, || format!("Profile sequence for user {}", user_id)))
    }

    async fn insert_profile(
        &self,
        user_id: Uuid,
        profile_id: i64,
        profile_name: &str,
        model: &str,
    ) -> PortResult<Profile> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let record = sqlx::query_as::<_, ProfileRecord>(
            "INSERT INTO model_profiles (user_id, profile_id, profile_name, model) \
             VALUES ($1, $2, $3, $4) \
             RETURNING user_id, profile_id, profile_name, model",
        )
        .bind(user_id)
        .bind(profile_id)
        .bind(profile_name)
        .bind(model)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| write_error(e, || format!("Profile {} of user {}", profile_id, user_id)))?;
        tx.commit().await.map_err(storage)?;
        Ok(record.to_domain())
    }

    async fn get_profile(&self, user_id: Uuid, profile_id: i64) -> PortResult<Profile> {
        let record = sqlx::query_as::<_, ProfileRecord>(
            "SELECT user_id, profile_id, profile_name, model FROM model_profiles \
             WHERE user_id = $1 AND profile_id = $2",
        )
        .bind(user_id)
        .bind(profile_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found_or(e, || format!("Profile {}", profile_id)))?;
        Ok(record.to_domain())
    }

    async fn list_profiles(&self, user_id: Uuid) -> PortResult<Vec<ProfileSummary>> {
        let records = sqlx::query_as::<_, ProfileRecord>(
            "SELECT user_id, profile_id, profile_name, model FROM model_profiles \
             WHERE user_id = $1 ORDER BY profile_id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let profiles = records
            .into_iter()
            .map(|r| ProfileSummary {
                profile_id: r.profile_id,
                profile_name: r.profile_name,
            })
            .collect();
        Ok(profiles)
    }

    async fn create_chat_session(
        &self,
        user_id: Uuid,
        profile_id: i64,
    ) -> PortResult<ChatSession> {
        // Inserting from the profile row makes a missing profile yield no row.
        let record = sqlx::query_as::<_, ChatLogRecord>(
            "INSERT INTO chat_logs (user_id, profile_id) \
             SELECT user_id, profile_id FROM model_profiles WHERE user_id = $1 AND profile_id = $2 \
             RETURNING chatlog_id, user_id, profile_id",
        )
        .bind(user_id)
        .bind(profile_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| write_error(e, || format!("Chat log for profile {}", profile_id)))?
        .ok_or_else(|| PortError::NotFound(format!("Profile {} not found", profile_id)))?;
        Ok(record.to_domain())
    }

    async fn list_chat_sessions(&self, user_id: Uuid, profile_id: i64) -> PortResult<Vec<i64>> {
        sqlx::query_scalar::<_, i64>(
            "SELECT chatlog_id FROM chat_logs WHERE user_id = $1 AND profile_id = $2 \
             ORDER BY chatlog_id ASC",
        )
        .bind(user_id)
        .bind(profile_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)
    }

    async fn get_session_context(&self, chatlog_id: i64) -> PortResult<SessionContext> {
        let record = sqlx::query_as::<_, SessionContextRecord>(
            "SELECT c.chatlog_id, c.user_id, c.profile_id, p.model \
             FROM chat_logs c \
             JOIN model_profiles p ON p.user_id = c.user_id AND p.profile_id = c.profile_id \
             WHERE c.chatlog_id = $1",
        )
        .bind(chatlog_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found_or(e, || format!("Chat log {}", chatlog_id)))?;

        Ok(SessionContext {
            session: ChatSession {
                chatlog_id: record.chatlog_id,
                user_id: record.user_id,
                profile_id: record.profile_id,
            },
            model: record.model,
        })
    }

    async fn get_messages(&self, chatlog_id: i64) -> PortResult<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            "SELECT chatlog_id, message_id, sender, content FROM messages \
             WHERE chatlog_id = $1 ORDER BY message_id ASC",
        )
        .bind(chatlog_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn append_exchange(
        &self,
        chatlog_id: i64,
        user_text: &str,
        assistant_text: &str,
    ) -> PortResult<(Message, Message)> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        // The row lock serializes appends to one chat log across connections.
        sqlx::query_scalar::<_, i64>(
            "SELECT chatlog_id FROM chat_logs WHERE chatlog_id = $1 FOR UPDATE",
        )
        .bind(chatlog_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage)?
        .ok_or_else(|| PortError::NotFound(format!("Chat log {} not found", chatlog_id)))?;

        let next_id = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(message_id) + 1, 0) FROM messages WHERE chatlog_id = $1",
        )
        .bind(chatlog_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage)?;

        let prompt = Message {
            chatlog_id,
            message_id: next_id,
            sender: Sender::User,
            content: user_text.to_string(),
        };
        let reply = Message {
            chatlog_id,
            message_id: next_id + 1,
            sender: Sender::Assistant,
            content: assistant_text.to_string(),
        };

        sqlx::query(
            "INSERT INTO messages (chatlog_id, message_id, sender, content) \
             VALUES ($1, $2, $3, $4), ($1, $5, $6, $7)",
        )
        .bind(chatlog_id)
        .bind(prompt.message_id)
        .bind(prompt.sender.as_str())
        .bind(&prompt.content)
        .bind(reply.message_id)
        .bind(reply.sender.as_str())
        .bind(&reply.content)
        .execute(&mut *tx)
        .await
        .map_err(|e| write_error(e, || format!("Messages {}-{}", next_id, next_id + 1)))?;

        tx.commit().await.map_err(storage)?;
        Ok((prompt, reply))
    }
}
