//! crates/ruleset_chat_core/src/testing.rs
//!
//! In-memory implementations of every port, for unit and router tests.
//! Each one offers failure switches so tests can exercise rollback paths.

use crate::domain::{
    ChatMessage, ChatSession, Claims, Message, Profile, ProfileSummary, Ruleset, Sender,
    SessionContext, User, UserCredentials,
};
use crate::ports::{
    CompletionService, CredentialService, DatabaseService, PasswordService, PortError, PortResult,
    RulesetStore,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

//=========================================================================================
// Database
//=========================================================================================

#[derive(Default)]
struct Tables {
    users: Vec<UserCredentials>,
    sequences: HashMap<Uuid, i64>,
    profiles: BTreeMap<(Uuid, i64), Profile>,
    chat_logs: BTreeMap<i64, ChatSession>,
    messages: BTreeMap<(i64, i64), Message>,
}

#[derive(Default)]
pub struct InMemoryDatabase {
    tables: Mutex<Tables>,
    fail_profile_inserts: AtomicBool,
    fail_appends: AtomicBool,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `insert_profile` fail with a storage error.
    pub fn fail_profile_inserts(&self, fail: bool) {
        self.fail_profile_inserts.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent `append_exchange` fail with a storage error.
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn profile_count(&self) -> usize {
        locked(&self.tables).profiles.len()
    }

    pub fn message_count(&self, chatlog_id: i64) -> usize {
        locked(&self.tables)
            .messages
            .keys()
            .filter(|(id, _)| *id == chatlog_id)
            .count()
    }
}

#[async_trait]
impl DatabaseService for InMemoryDatabase {
    async fn create_user(
        &self,
        username: &str,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<User> {
        let mut tables = locked(&self.tables);
        if tables
            .users
            .iter()
            .any(|u| u.email == email || u.username == username)
        {
            return Err(PortError::Conflict(format!("User {} already exists", email)));
        }
        let creds = UserCredentials {
            user_id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            hashed_password: hashed_password.to_string(),
        };
        let user = creds.to_user();
        tables.users.push(creds);
        Ok(user)
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        locked(&self.tables)
            .users
            .iter()
            .find(|u| u.email == email)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", email)))
    }

    async fn reserve_profile_id(&self, user_id: Uuid) -> PortResult<i64> {
        let mut tables = locked(&self.tables);
        let next = tables.sequences.entry(user_id).or_insert(0);
        let reserved = *next;
        *next += 1;
        Ok(reserved)
    }

    async fn insert_profile(
        &self,
        user_id: Uuid,
        profile_id: i64,
        profile_name: &str,
        model: &str,
    ) -> PortResult<Profile> {
        if self.fail_profile_inserts.load(Ordering::SeqCst) {
            return Err(PortError::Storage("profile insert disabled".to_string()));
        }
        let mut tables = locked(&self.tables);
        if tables.profiles.contains_key(&(user_id, profile_id)) {
            return Err(PortError::Conflict(format!(
                "Profile {} already exists for user {}",
                profile_id, user_id
            )));
        }
        let profile = Profile {
            user_id,
            profile_id,
            profile_name: profile_name.to_string(),
            model: model.to_string(),
        };
        tables.profiles.insert((user_id, profile_id), profile.clone());
        Ok(profile)
    }

    async fn get_profile(&self, user_id: Uuid, profile_id: i64) -> PortResult<Profile> {
        locked(&self.tables)
            .profiles
            .get(&(user_id, profile_id))
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Profile {} not found", profile_id)))
    }

    async fn list_profiles(&self, user_id: Uuid) -> PortResult<Vec<ProfileSummary>> {
        Ok(locked(&self.tables)
            .profiles
            .values()
            .filter(|p| p.user_id == user_id)
            .map(|p| ProfileSummary {
                profile_id: p.profile_id,
                profile_name: p.profile_name.clone(),
            })
            .collect())
    }

    async fn create_chat_session(
        &self,
        user_id: Uuid,
        profile_id: i64,
    ) -> PortResult<ChatSession> {
        let mut tables = locked(&self.tables);
        if !tables.profiles.contains_key(&(user_id, profile_id)) {
            return Err(PortError::NotFound(format!("Profile {} not found", profile_id)));
        }
        let chatlog_id = tables.chat_logs.keys().next_back().map_or(1, |id| id + 1);
        let session = ChatSession {
            chatlog_id,
            user_id,
            profile_id,
        };
        tables.chat_logs.insert(chatlog_id, session);
        Ok(session)
    }

    async fn list_chat_sessions(&self, user_id: Uuid, profile_id: i64) -> PortResult<Vec<i64>> {
        Ok(locked(&self.tables)
            .chat_logs
            .values()
            .filter(|s| s.user_id == user_id && s.profile_id == profile_id)
            .map(|s| s.chatlog_id)
            .collect())
    }

    async fn get_session_context(&self, chatlog_id: i64) -> PortResult<SessionContext> {
        let tables = locked(&self.tables);
        let session = tables
            .chat_logs
            .get(&chatlog_id)
            .copied()
            .ok_or_else(|| PortError::NotFound(format!("Chat log {} not found", chatlog_id)))?;
        let profile = tables
            .profiles
            .get(&(session.user_id, session.profile_id))
            .ok_or_else(|| PortError::NotFound(format!("Chat log {} not found", chatlog_id)))?;
        Ok(SessionContext {
            session,
            model: profile.model.clone(),
        })
    }

    async fn get_messages(&self, chatlog_id: i64) -> PortResult<Vec<Message>> {
        Ok(locked(&self.tables)
            .messages
            .range((chatlog_id, i64::MIN)..=(chatlog_id, i64::MAX))
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn append_exchange(
        &self,
        chatlog_id: i64,
        user_text: &str,
        assistant_text: &str,
    ) -> PortResult<(Message, Message)> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(PortError::Storage("append disabled".to_string()));
        }
        let mut tables = locked(&self.tables);
        if !tables.chat_logs.contains_key(&chatlog_id) {
            return Err(PortError::NotFound(format!("Chat log {} not found", chatlog_id)));
        }
        let next = tables
            .messages
            .range((chatlog_id, i64::MIN)..=(chatlog_id, i64::MAX))
            .next_back()
            .map_or(0, |((_, id), _)| id + 1);
        let prompt = Message {
            chatlog_id,
            message_id: next,
            sender: Sender::User,
            content: user_text.to_string(),
        };
        let reply = Message {
            chatlog_id,
            message_id: next + 1,
            sender: Sender::Assistant,
            content: assistant_text.to_string(),
        };
        tables.messages.insert((chatlog_id, next), prompt.clone());
        tables.messages.insert((chatlog_id, next + 1), reply.clone());
        Ok((prompt, reply))
    }
}

//=========================================================================================
// Ruleset Store
//=========================================================================================

#[derive(Default)]
pub struct InMemoryRulesetStore {
    documents: Mutex<HashMap<(Uuid, i64), Ruleset>>,
}

impl InMemoryRulesetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, user_id: Uuid, profile_id: i64) -> bool {
        locked(&self.documents).contains_key(&(user_id, profile_id))
    }

    pub fn len(&self) -> usize {
        locked(&self.documents).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops a document behind the registry's back, leaving an orphaned profile.
    pub fn remove_silently(&self, user_id: Uuid, profile_id: i64) {
        locked(&self.documents).remove(&(user_id, profile_id));
    }
}

#[async_trait]
impl RulesetStore for InMemoryRulesetStore {
    async fn put(&self, user_id: Uuid, profile_id: i64, ruleset: &Ruleset) -> PortResult<()> {
        let mut documents = locked(&self.documents);
        if documents.contains_key(&(user_id, profile_id)) {
            return Err(PortError::Conflict(format!(
                "Ruleset {}/{} already exists",
                user_id, profile_id
            )));
        }
        documents.insert((user_id, profile_id), ruleset.clone());
        Ok(())
    }

    async fn get(&self, user_id: Uuid, profile_id: i64) -> PortResult<Ruleset> {
        locked(&self.documents)
            .get(&(user_id, profile_id))
            .cloned()
            .ok_or_else(|| {
                PortError::NotFound(format!("Ruleset {}/{} not found", user_id, profile_id))
            })
    }

    async fn delete(&self, user_id: Uuid, profile_id: i64) -> PortResult<()> {
        locked(&self.documents).remove(&(user_id, profile_id));
        Ok(())
    }
}

//=========================================================================================
// Completion Provider
//=========================================================================================

/// Replies from a queue of scripted outcomes, falling back to echoing the
/// last message. Every request is recorded.
#[derive(Default)]
pub struct ScriptedCompletions {
    outcomes: Mutex<VecDeque<PortResult<String>>>,
    requests: Mutex<Vec<(String, Vec<ChatMessage>)>>,
    delay: Option<Duration>,
}

impl ScriptedCompletions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_reply(&self, reply: &str) {
        locked(&self.outcomes).push_back(Ok(reply.to_string()));
    }

    pub fn push_failure(&self, message: &str) {
        locked(&self.outcomes).push_back(Err(PortError::Provider(message.to_string())));
    }

    /// Recorded `(model, messages)` pairs, in call order.
    pub fn requests(&self) -> Vec<(String, Vec<ChatMessage>)> {
        locked(&self.requests).clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletions {
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> PortResult<String> {
        locked(&self.requests).push((model.to_string(), messages.to_vec()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = locked(&self.outcomes).pop_front();
        match scripted {
            Some(outcome) => outcome,
            None => Ok(format!(
                "echo: {}",
                messages.last().map(|m| m.content.as_str()).unwrap_or_default()
            )),
        }
    }
}

//=========================================================================================
// Identity collaborators
//=========================================================================================

pub struct PlaintextPasswords;

impl PasswordService for PlaintextPasswords {
    fn hash_password(&self, password: &str) -> PortResult<String> {
        Ok(format!("plain${}", password))
    }

    fn verify_password(&self, password: &str, hashed_password: &str) -> PortResult<bool> {
        Ok(hashed_password.strip_prefix("plain$") == Some(password))
    }
}

/// Encodes claims as `sub|iat|exp` without a signature. Still rejects expired tokens.
pub struct UnsignedCredentials;

impl CredentialService for UnsignedCredentials {
    fn sign(&self, claims: &Claims) -> PortResult<String> {
        Ok(format!("{}|{}|{}", claims.sub, claims.iat, claims.exp))
    }

    fn verify(&self, token: &str) -> PortResult<Claims> {
        let mut parts = token.split('|');
        let (Some(sub), Some(iat), Some(exp), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(PortError::Unauthorized);
        };
        let claims = Claims {
            sub: sub.to_string(),
            iat: iat.parse().map_err(|_| PortError::Unauthorized)?,
            exp: exp.parse().map_err(|_| PortError::Unauthorized)?,
        };
        if claims.exp <= Utc::now().timestamp() {
            return Err(PortError::Unauthorized);
        }
        Ok(claims)
    }
}
