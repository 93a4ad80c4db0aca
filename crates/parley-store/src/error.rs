use parley_core::RelayError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("unknown session: {0}")]
    UnknownSession(String),
}

impl From<StoreError> for RelayError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UnknownSession(id) => RelayError::UnknownSession(id),
        }
    }
}
