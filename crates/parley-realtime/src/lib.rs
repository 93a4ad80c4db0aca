pub mod issuer;
pub mod mock;
pub mod openai;

pub use issuer::{CredentialError, CredentialIssuer};
pub use mock::StaticIssuer;
pub use openai::{OpenAiRealtimeIssuer, RealtimeConfig};
