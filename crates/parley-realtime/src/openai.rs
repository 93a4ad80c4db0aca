use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::instrument;

use crate::issuer::{CredentialError, CredentialIssuer};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini-realtime-preview-2024-12-17";
pub const DEFAULT_VOICE: &str = "verse";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for the realtime session endpoint.
#[derive(Clone)]
pub struct RealtimeConfig {
    pub api_key: Option<SecretString>,
    pub model: String,
    pub voice: String,
    pub base_url: String,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl std::fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Serialize)]
struct SessionRequest<'a> {
    model: &'a str,
    voice: &'a str,
}

/// Creates realtime sessions upstream and returns their ephemeral client secret.
pub struct OpenAiRealtimeIssuer {
    client: Client,
    config: RealtimeConfig,
}

impl OpenAiRealtimeIssuer {
    pub fn new(config: RealtimeConfig) -> Result<Self, CredentialError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn sessions_url(&self) -> String {
        format!("{}/realtime/sessions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CredentialIssuer for OpenAiRealtimeIssuer {
    fn name(&self) -> &str {
        "openai-realtime"
    }

    #[instrument(skip(self), fields(model = %self.config.model))]
    async fn issue(&self) -> Result<serde_json::Value, CredentialError> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or(CredentialError::MissingApiKey)?;

        let response = self
            .client
            .post(self.sessions_url())
            .bearer_auth(api_key.expose_secret())
            .json(&SessionRequest {
                model: &self.config.model,
                voice: &self.config.voice,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let payload = response.json::<serde_json::Value>().await?;
        tracing::debug!("Issued realtime credential");
        Ok(payload)
    }
}
