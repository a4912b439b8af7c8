//! crates/ruleset_chat_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use crate::domain::{
    ChatMessage, ChatSession, Claims, Message, Profile, ProfileSummary, Ruleset, SessionContext,
    User, UserCredentials,
};
use async_trait::async_trait;
use uuid::Uuid;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// The error type for all port and service operations.
/// Every failure maps to exactly one of these kinds.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Completion provider error: {0}")]
    Provider(String),
    #[error("Data integrity violation: {0}")]
    Integrity(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The relational store: users, profile registry, session registry and message log.
#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- User Management ---
    /// Fails with `Conflict` if the email or username is already registered.
    async fn create_user(
        &self,
        username: &str,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<User>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    // --- Profile Registry ---
    /// Atomically hands out the next profile id for `user_id` (0, 1, 2, ...).
    /// An id is never handed out twice, even if the profile is never inserted.
    async fn reserve_profile_id(&self, user_id: Uuid) -> PortResult<i64>;

    /// Fails with `Conflict` if `(user_id, profile_id)` already exists.
    async fn insert_profile(
        &self,
        user_id: Uuid,
        profile_id: i64,
        profile_name: &str,
        model: &str,
    ) -> PortResult<Profile>;

    async fn get_profile(&self, user_id: Uuid, profile_id: i64) -> PortResult<Profile>;

    /// Profiles of a user in ascending `profile_id` order.
    async fn list_profiles(&self, user_id: Uuid) -> PortResult<Vec<ProfileSummary>>;

    // --- Session Registry ---
    /// Fails with `NotFound` if no profile exists for `(user_id, profile_id)`.
    async fn create_chat_session(&self, user_id: Uuid, profile_id: i64)
        -> PortResult<ChatSession>;

    /// Chat log ids of a profile in ascending order.
    async fn list_chat_sessions(&self, user_id: Uuid, profile_id: i64) -> PortResult<Vec<i64>>;

    /// Resolves a chat log to its owner, profile and the profile's model.
    async fn get_session_context(&self, chatlog_id: i64) -> PortResult<SessionContext>;

    // --- Message Log ---
    /// Messages of a chat log in ascending `message_id` order.
    async fn get_messages(&self, chatlog_id: i64) -> PortResult<Vec<Message>>;

    /// Appends the prompt and the reply as two consecutive messages in one
    /// transaction, numbered from `max(message_id) + 1` (or 0).
    async fn append_exchange(
        &self,
        chatlog_id: i64,
        user_text: &str,
        assistant_text: &str,
    ) -> PortResult<(Message, Message)>;
}

/// Durable blob storage for ruleset documents, keyed by `(user_id, profile_id)`.
#[async_trait]
pub trait RulesetStore: Send + Sync {
    /// Writes the document durably. Fails with `Conflict` if a document already
    /// exists under the key; existing documents are never overwritten.
    async fn put(&self, user_id: Uuid, profile_id: i64, ruleset: &Ruleset) -> PortResult<()>;

    async fn get(&self, user_id: Uuid, profile_id: i64) -> PortResult<Ruleset>;

    /// Removes the document. Removing a missing document is not an error.
    async fn delete(&self, user_id: Uuid, profile_id: i64) -> PortResult<()>;
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Produces one reply for an ordered message list. Non-streaming.
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> PortResult<String>;
}

/// Signs and verifies bearer credentials.
pub trait CredentialService: Send + Sync {
    fn sign(&self, claims: &Claims) -> PortResult<String>;

    /// Fails with `Unauthorized` for malformed, tampered or expired tokens.
    fn verify(&self, token: &str) -> PortResult<Claims>;
}

pub trait PasswordService: Send + Sync {
    fn hash_password(&self, password: &str) -> PortResult<String>;

    fn verify_password(&self, password: &str, hashed_password: &str) -> PortResult<bool>;
}
