pub mod backends;
#[cfg(test)]
pub mod fake;
pub mod subscription;
pub mod supabase;
pub mod traits;
pub mod types;

pub use backends::Backends;
pub use subscription::Subscription;
pub use traits::{AuthProvider, MessageStore, ProfileStore, PushTokenStore, RealtimeFeed, SendEndpoint};
pub use types::{BackendError, DeviceInfo, FeedEvent, MessageRow, NewMessage, PushRegistration};
