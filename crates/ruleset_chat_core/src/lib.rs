pub mod conversation;
pub mod domain;
pub mod identity;
pub mod ports;
pub mod profiles;
pub mod sessions;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use conversation::ConversationService;
pub use domain::{
    ChatMessage, ChatSession, Claims, Credential, Exchange, Message, Profile, ProfileSummary, Role,
    Ruleset, Sender, SessionContext, User, UserCredentials,
};
pub use identity::IdentityService;
pub use ports::{
    CompletionService, CredentialService, DatabaseService, PasswordService, PortError, PortResult,
    RulesetStore,
};
pub use profiles::{CreatedProfile, ProfileRegistry};
pub use sessions::SessionRegistry;
