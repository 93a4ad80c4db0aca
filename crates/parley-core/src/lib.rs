pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;

pub use errors::RelayError;
pub use events::{ClientEvent, ServerEvent};
pub use ids::{ConnectionId, MessageId};
pub use messages::{MembershipEvent, Message};
