pub mod conversation;
pub mod message;
pub mod profile;
pub mod session;

pub use conversation::{ConversationSummary, ParticipantPair};
pub use message::{DeliveryState, Draft, Message, MessageId};
pub use profile::Profile;
pub use session::{Session, SessionUser};
