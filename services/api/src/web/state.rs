//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use chrono::Duration;
use ruleset_chat_core::ports::{
    CompletionService, CredentialService, DatabaseService, PasswordService, RulesetStore,
};
use ruleset_chat_core::{ConversationService, IdentityService, ProfileRegistry, SessionRegistry};
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub identity: Arc<IdentityService>,
    pub profiles: Arc<ProfileRegistry>,
    pub sessions: Arc<SessionRegistry>,
    pub conversations: Arc<ConversationService>,
}

impl AppState {
    /// Wires the core services on top of the given port implementations.
    pub fn new(
        config: &Config,
        db: Arc<dyn DatabaseService>,
        rulesets: Arc<dyn RulesetStore>,
        completions: Arc<dyn CompletionService>,
        passwords: Arc<dyn PasswordService>,
        credentials: Arc<dyn CredentialService>,
    ) -> Self {
        let identity = Arc::new(IdentityService::new(
            db.clone(),
            passwords,
            credentials,
            Duration::hours(config.token_ttl_hours),
        ));
        let sessions = Arc::new(SessionRegistry::new(db.clone()));
        let profiles = Arc::new(ProfileRegistry::new(
            db.clone(),
            rulesets.clone(),
            sessions.clone(),
        ));
        let conversations = Arc::new(ConversationService::new(
            db,
            rulesets,
            completions,
            config.completion_timeout,
        ));

        Self {
            identity,
            profiles,
            sessions,
            conversations,
        }
    }
}
