pub mod error;
pub mod session;
pub mod store;

pub use error::StoreError;
pub use session::{Member, Session};
pub use store::{LeaveOutcome, SessionHandle, SessionStore, SessionSummary};
