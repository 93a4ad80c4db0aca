/// Errors a single connection can run into while talking to the relay.
///
/// None of these are fatal to the process or visible to other connections:
/// the gateway reports them to the originating connection only.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("connection has not joined a session")]
    NotJoined,
    #[error("unknown session: {0}")]
    UnknownSession(String),
}

impl RelayError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Stable code carried by the outbound `error` event.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::NotJoined => "NOT_JOINED",
            Self::UnknownSession(_) => "UNKNOWN_SESSION",
        }
    }
}

/// Code used for frames that could not be decoded into a [`crate::ClientEvent`].
pub const PARSE_ERROR: &str = "PARSE_ERROR";
