//! crates/ruleset_chat_core/src/conversation.rs
//!
//! Relays prompts through a profile's ruleset to the completion provider and
//! records each accepted exchange in the message log.
//!
//! Calls to `respond` for the same chat log are serialized in-process, from
//! history load to append, so every request sees all prior exchanges in order.
//! The database append takes its own row lock, keeping message ids unique
//! across processes as well.

use crate::domain::{ChatMessage, Exchange, Message, Role, Ruleset};
use crate::ports::{CompletionService, DatabaseService, PortError, PortResult, RulesetStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default upper bound on a single completion call.
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(60);

/// Builds the provider request: the ruleset as a system instruction, then the
/// history in order, then the new prompt.
pub fn build_request(ruleset: &Ruleset, history: &[Message], prompt: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::new(
        Role::System,
        format!("You must strictly follow these rules: {}", ruleset),
    ));
    messages.extend(
        history
            .iter()
            .map(|m| ChatMessage::new(Role::from(m.sender), m.content.clone())),
    );
    messages.push(ChatMessage::new(Role::User, prompt));
    messages
}

/// Per-chat-log locks. Entries are dropped once nobody holds or awaits them.
#[derive(Default)]
struct ChatLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    async fn acquire(&self, chatlog_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(chatlog_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    async fn release(&self, chatlog_id: i64, guard: OwnedMutexGuard<()>) {
        drop(guard);
        let mut map = self.inner.lock().await;
        if map
            .get(&chatlog_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(&chatlog_id);
        }
    }
}

pub struct ConversationService {
    db: Arc<dyn DatabaseService>,
    rulesets: Arc<dyn RulesetStore>,
    completions: Arc<dyn CompletionService>,
    completion_timeout: Duration,
    locks: ChatLocks,
}

impl ConversationService {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        rulesets: Arc<dyn RulesetStore>,
        completions: Arc<dyn CompletionService>,
        completion_timeout: Duration,
    ) -> Self {
        Self {
            db,
            rulesets,
            completions,
            completion_timeout,
            locks: ChatLocks::default(),
        }
    }

    /// Sends `prompt` to the chat log's model and persists the exchange.
    ///
    /// Nothing is written unless the provider replies. A chat log owned by
    /// someone else is reported as `NotFound`.
    pub async fn respond(&self, owner: Uuid, chatlog_id: i64, prompt: &str) -> PortResult<Exchange> {
        if prompt.trim().is_empty() {
            return Err(PortError::Validation("prompt must not be empty".to_string()));
        }

        let guard = self.locks.acquire(chatlog_id).await;
        let result = self.respond_locked(owner, chatlog_id, prompt).await;
        self.locks.release(chatlog_id, guard).await;
        result
    }

    async fn respond_locked(
        &self,
        owner: Uuid,
        chatlog_id: i64,
        prompt: &str,
    ) -> PortResult<Exchange> {
        let context = self.db.get_session_context(chatlog_id).await?;
        if context.session.user_id != owner {
            return Err(chat_log_not_found(chatlog_id));
        }
        let session = context.session;

        let ruleset = match self.rulesets.get(session.user_id, session.profile_id).await {
            Ok(ruleset) => ruleset,
            Err(PortError::NotFound(msg)) => {
                warn!(
                    "Chat log {} belongs to profile {} of user {} which has no ruleset document",
                    chatlog_id, session.profile_id, session.user_id
                );
                return Err(PortError::NotFound(msg));
            }
            Err(e) => return Err(e),
        };

        let history = self.db.get_messages(chatlog_id).await?;
        let request = build_request(&ruleset, &history, prompt);
        debug!(
            "Requesting completion from {} for chat log {} with {} messages",
            context.model,
            chatlog_id,
            request.len()
        );

        let reply = tokio::time::timeout(
            self.completion_timeout,
            self.completions.complete(&context.model, &request),
        )
        .await
        .map_err(|_| {
            PortError::Provider(format!(
                "completion timed out after {}s",
                self.completion_timeout.as_secs()
            ))
        })??;

        let (prompt_message, reply_message) =
            self.db.append_exchange(chatlog_id, prompt, &reply).await?;
        info!(
            "Recorded exchange {}-{} in chat log {}",
            prompt_message.message_id, reply_message.message_id, chatlog_id
        );
        Ok(Exchange {
            prompt: prompt_message,
            reply: reply_message,
        })
    }

    /// The ordered history of a chat log, checked against its owner and profile.
    pub async fn messages(
        &self,
        owner: Uuid,
        profile_id: i64,
        chatlog_id: i64,
    ) -> PortResult<Vec<Message>> {
        let context = self.db.get_session_context(chatlog_id).await?;
        if context.session.user_id != owner || context.session.profile_id != profile_id {
            return Err(chat_log_not_found(chatlog_id));
        }
        self.db.get_messages(chatlog_id).await
    }
}

fn chat_log_not_found(chatlog_id: i64) -> PortError {
    PortError::NotFound(format!("Chat log {} not found", chatlog_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Sender;
    use crate::profiles::ProfileRegistry;
    use crate::sessions::SessionRegistry;
    use crate::testing::{InMemoryDatabase, InMemoryRulesetStore, ScriptedCompletions};
    use serde_json::json;

    struct Fixture {
        db: Arc<InMemoryDatabase>,
        rulesets: Arc<InMemoryRulesetStore>,
        completions: Arc<ScriptedCompletions>,
        conversations: Arc<ConversationService>,
        user: Uuid,
        profile_id: i64,
        chatlog_id: i64,
    }

    async fn fixture_with(completions: ScriptedCompletions, timeout: Duration) -> Fixture {
        let db = Arc::new(InMemoryDatabase::new());
        let rulesets = Arc::new(InMemoryRulesetStore::new());
        let completions = Arc::new(completions);
        let sessions = Arc::new(SessionRegistry::new(db.clone()));
        let profiles = ProfileRegistry::new(db.clone(), rulesets.clone(), sessions);
        let conversations = Arc::new(ConversationService::new(
            db.clone(),
            rulesets.clone(),
            completions.clone(),
            timeout,
        ));

        let user = Uuid::new_v4();
        let created = profiles
            .create(user, "terse", "hermes", &json!({"style": "terse"}))
            .await
            .unwrap();
        Fixture {
            db,
            rulesets,
            completions,
            conversations,
            user,
            profile_id: created.profile.profile_id,
            chatlog_id: created.chatlog_id,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(ScriptedCompletions::new(), DEFAULT_COMPLETION_TIMEOUT).await
    }

    #[test]
    fn request_embeds_ruleset_history_and_prompt_in_order() {
        let history = vec![
            Message {
                chatlog_id: 1,
                message_id: 0,
                sender: Sender::User,
                content: "q".to_string(),
            },
            Message {
                chatlog_id: 1,
                message_id: 1,
                sender: Sender::Assistant,
                content: "a".to_string(),
            },
        ];
        let request = build_request(&json!({"lang": "en"}), &history, "next");

        assert_eq!(
            request,
            vec![
                ChatMessage::new(
                    Role::System,
                    r#"You must strictly follow these rules: {"lang":"en"}"#
                ),
                ChatMessage::new(Role::User, "q"),
                ChatMessage::new(Role::Assistant, "a"),
                ChatMessage::new(Role::User, "next"),
            ]
        );
    }

    #[tokio::test]
    async fn first_exchange_is_numbered_from_zero() {
        let f = fixture().await;
        f.completions.push_reply("hi");

        let exchange = f
            .conversations
            .respond(f.user, f.chatlog_id, "hello")
            .await
            .unwrap();
        assert_eq!(exchange.reply.content, "hi");

        let requests = f.completions.requests();
        assert_eq!(requests.len(), 1);
        let (model, messages) = &requests[0];
        assert_eq!(model, "hermes");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains(r#"{"style":"terse"}"#));
        assert_eq!(messages[1], ChatMessage::new(Role::User, "hello"));

        let stored = f
            .conversations
            .messages(f.user, f.profile_id, f.chatlog_id)
            .await
            .unwrap();
        assert_eq!(
            stored,
            vec![
                Message {
                    chatlog_id: f.chatlog_id,
                    message_id: 0,
                    sender: Sender::User,
                    content: "hello".to_string(),
                },
                Message {
                    chatlog_id: f.chatlog_id,
                    message_id: 1,
                    sender: Sender::Assistant,
                    content: "hi".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn later_requests_carry_prior_history() {
        let f = fixture().await;
        f.completions.push_reply("hi");
        f.completions.push_reply("fine");

        f.conversations
            .respond(f.user, f.chatlog_id, "hello")
            .await
            .unwrap();
        let second = f
            .conversations
            .respond(f.user, f.chatlog_id, "how are you?")
            .await
            .unwrap();
        assert_eq!(second.prompt.message_id, 2);
        assert_eq!(second.reply.message_id, 3);

        let (_, messages) = &f.completions.requests()[1];
        let tail: Vec<_> = messages[1..]
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        assert_eq!(
            tail,
            vec![
                (Role::User, "hello"),
                (Role::Assistant, "hi"),
                (Role::User, "how are you?"),
            ]
        );
    }

    #[tokio::test]
    async fn provider_failure_writes_nothing() {
        let f = fixture().await;
        f.completions.push_failure("quota exceeded");

        let err = f
            .conversations
            .respond(f.user, f.chatlog_id, "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Provider(_)));
        assert_eq!(f.db.message_count(f.chatlog_id), 0);

        // The next prompt still starts at zero.
        let exchange = f
            .conversations
            .respond(f.user, f.chatlog_id, "again")
            .await
            .unwrap();
        assert_eq!(exchange.prompt.message_id, 0);
    }

    #[tokio::test]
    async fn slow_provider_times_out_without_writing() {
        let f = fixture_with(
            ScriptedCompletions::new().with_delay(Duration::from_millis(200)),
            Duration::from_millis(20),
        )
        .await;

        let err = f
            .conversations
            .respond(f.user, f.chatlog_id, "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Provider(_)));
        assert_eq!(f.db.message_count(f.chatlog_id), 0);
    }

    #[tokio::test]
    async fn failed_append_surfaces_as_storage_error() {
        let f = fixture().await;
        f.db.fail_appends(true);

        let err = f
            .conversations
            .respond(f.user, f.chatlog_id, "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Storage(_)));
        assert_eq!(f.db.message_count(f.chatlog_id), 0);
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected_without_calling_the_provider() {
        let f = fixture().await;
        let err = f
            .conversations
            .respond(f.user, f.chatlog_id, " \n ")
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Validation(_)));
        assert!(f.completions.requests().is_empty());
    }

    #[tokio::test]
    async fn unknown_or_foreign_chat_logs_are_not_found() {
        let f = fixture().await;
        assert!(matches!(
            f.conversations.respond(f.user, 999, "hello").await,
            Err(PortError::NotFound(_))
        ));
        assert!(matches!(
            f.conversations
                .respond(Uuid::new_v4(), f.chatlog_id, "hello")
                .await,
            Err(PortError::NotFound(_))
        ));
        assert!(matches!(
            f.conversations
                .messages(f.user, f.profile_id + 1, f.chatlog_id)
                .await,
            Err(PortError::NotFound(_))
        ));
        assert!(f.completions.requests().is_empty());
    }

    #[tokio::test]
    async fn missing_ruleset_is_not_found() {
        let f = fixture().await;
        f.rulesets.remove_silently(f.user, f.profile_id);

        let err = f
            .conversations
            .respond(f.user, f.chatlog_id, "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
        assert!(f.completions.requests().is_empty());
    }

    #[tokio::test]
    async fn concurrent_prompts_are_serialized_per_chat_log() {
        let f = fixture_with(
            ScriptedCompletions::new().with_delay(Duration::from_millis(10)),
            DEFAULT_COMPLETION_TIMEOUT,
        )
        .await;

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let conversations = f.conversations.clone();
                let (user, chatlog_id) = (f.user, f.chatlog_id);
                tokio::spawn(async move {
                    conversations
                        .respond(user, chatlog_id, &format!("prompt {}", i))
                        .await
                })
            })
            .collect();
        for handle in futures::future::join_all(handles).await {
            handle.unwrap().unwrap();
        }

        let stored = f
            .conversations
            .messages(f.user, f.profile_id, f.chatlog_id)
            .await
            .unwrap();
        let ids: Vec<i64> = stored.iter().map(|m| m.message_id).collect();
        assert_eq!(ids, (0..12).collect::<Vec<_>>());
        for pair in stored.chunks(2) {
            assert_eq!(pair[0].sender, Sender::User);
            assert_eq!(pair[1].sender, Sender::Assistant);
            assert_eq!(pair[1].content, format!("echo: {}", pair[0].content));
        }

        // Each request saw every exchange accepted before it.
        let mut history_lengths: Vec<usize> = f
            .completions
            .requests()
            .iter()
            .map(|(_, messages)| messages.len() - 2)
            .collect();
        history_lengths.sort_unstable();
        assert_eq!(history_lengths, vec![0, 2, 4, 6, 8, 10]);
    }
}
