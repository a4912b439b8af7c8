pub mod completion;
pub mod credentials;
pub mod db;
pub mod passwords;
pub mod rulesets;

pub use completion::OpenAiCompletionAdapter;
pub use credentials::JwtCredentialService;
pub use db::DbAdapter;
pub use passwords::Argon2PasswordService;
pub use rulesets::FsRulesetStore;
