pub mod auth;
pub mod chat;
pub mod conversation;
pub mod database;
pub mod delivery;
pub mod error;
pub mod inbox;
pub mod profiles;
pub mod push;
pub mod reconciler;
pub mod settings;

pub use auth::{AuthError, AuthService};
pub use chat::{ChatCommand, ChatSession, ChatUpdate, FeedState, SendOutcome};
pub use database::Database;
pub use delivery::{Channel, Dispatcher};
pub use error::ChatError;
pub use inbox::Inbox;
pub use profiles::{ProfileResolver, ResolvedProfile};
pub use push::PushRegistrar;
pub use reconciler::{Conversation, InsertOutcome};
pub use settings::{ChatSettings, ReconnectPolicy, SettingsService};
