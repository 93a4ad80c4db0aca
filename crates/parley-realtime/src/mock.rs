use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::issuer::{CredentialError, CredentialIssuer};

/// Issuer that hands back a fixed payload, or always fails when built with
/// [`StaticIssuer::unconfigured`]. For tests and offline development.
pub struct StaticIssuer {
    payload: Option<serde_json::Value>,
    call_count: AtomicUsize,
}

impl StaticIssuer {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload: Some(payload),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn unconfigured() -> Self {
        Self {
            payload: None,
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CredentialIssuer for StaticIssuer {
    fn name(&self) -> &str {
        "static"
    }

    async fn issue(&self) -> Result<serde_json::Value, CredentialError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.payload.clone().ok_or(CredentialError::MissingApiKey)
    }
}
