use async_trait::async_trait;

/// Mints the short-lived credential a browser uses to open its own peer
/// connection to the realtime model endpoint. The relay never sees that
/// connection; it only hands out the credential.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Request a fresh credential. The upstream payload is returned verbatim.
    async fn issue(&self) -> Result<serde_json::Value, CredentialError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("API key not configured")]
    MissingApiKey,
    #[error("network error: {0}")]
    Network(String),
    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
}

impl CredentialError {
    /// Message safe to show a browser. Upstream detail stays in the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::MissingApiKey => "API key not configured",
            _ => "Failed to generate token",
        }
    }
}

impl From<reqwest::Error> for CredentialError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            CredentialError::InvalidResponse(e.to_string())
        } else {
            CredentialError::Network(e.to_string())
        }
    }
}
