pub mod connection;
pub mod gateway;
pub mod handlers;
pub mod membership;
pub mod registry;
pub mod relay;
pub mod server;

pub use gateway::{ConnectionState, Gateway, Inbound};
pub use membership::MembershipManager;
pub use registry::{Binding, ConnectionRegistry};
pub use relay::MessageRelay;
pub use server::{build_router, start, AppState, ServerConfig, ServerError, ServerHandle};
