use reqwest::{
    Client,
    header::{AUTHORIZATION, HeaderValue},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;
use crate::protocol::models::{ArbitraryJson, SessionKind};

const BASE_URL: &str = "https://api.openai.com/v1/realtime";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Session descriptor sent when minting an ephemeral credential.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDescriptor {
    #[serde(rename = "type")]
    pub kind: SessionKind,
    pub model: String,
}

#[derive(Debug, Clone, Serialize)]
struct CreateClientSecretRequest {
    session: SessionDescriptor,
}

/// Short-lived credential authorizing a single realtime session negotiation.
#[derive(Debug, Clone, Deserialize)]
pub struct EphemeralSecret {
    pub value: String,
    pub expires_at: u64,
    /// Server-side view of the session the secret was minted for.
    pub session: Option<ArbitraryJson>,
}

/// Minimal REST adapter for the credential exchange that precedes session
/// negotiation.
#[derive(Clone, Debug)]
pub struct RealtimeRestAdapter {
    client: Client,
    auth_header: HeaderValue,
}

impl RealtimeRestAdapter {
    /// # Errors
    /// Returns an error if the API key is not a valid header value or the
    /// HTTP client cannot be built.
    #[allow(clippy::result_large_err)]
    pub fn new(api_key: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .pool_idle_timeout(DEFAULT_POOL_IDLE_TIMEOUT)
            .build()?;

        let auth_header = HeaderValue::from_str(&format!("Bearer {api_key}"))?;

        Ok(Self {
            client,
            auth_header,
        })
    }

    /// Exchange the API key for an ephemeral client secret.
    ///
    /// # Errors
    /// Returns an error if the HTTP request fails or the server rejects it.
    pub async fn create_client_secret(&self, model: &str) -> Result<EphemeralSecret> {
        let request = CreateClientSecretRequest {
            session: SessionDescriptor {
                kind: SessionKind::Realtime,
                model: model.to_string(),
            },
        };

        let res = self
            .client
            .post(format!("{BASE_URL}/client_secrets"))
            .header(AUTHORIZATION, &self.auth_header)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        Ok(res.json().await?)
    }
}
