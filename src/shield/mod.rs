//! Content-Safety "prompt shield" client — pre-screens tool arguments for
//! prompt-injection/jailbreak attempts before a gated tool call proceeds.
//!
//! Grounded on `prompt_shield.py`'s wire format. Bearer-token acquisition
//! is abstracted behind [`TokenProvider`] since the original's Entra ID
//! `DefaultAzureCredential` is an external collaborator, not something to
//! reimplement here.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const API_VERSION: &str = "2024-09-01";
/// Tokens are treated as stale this long before their real expiry.
const TOKEN_FRESHNESS_BUFFER: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum ShieldError {
    #[error("shield endpoint not configured")]
    NotConfigured,
    #[error("token acquisition failed: {0}")]
    Token(String),
    #[error("shield request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("shield returned malformed response: {0}")]
    Malformed(String),
}

/// Supplies a fresh bearer token for the shield endpoint.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String, String>;
}

/// A token that never changes and never expires — for local testing and
/// deployments that front the shield endpoint with a static API key.
pub struct StaticTokenProvider(pub String);

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<String, String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone, Serialize)]
struct ShieldRequest<'a> {
    #[serde(rename = "userPrompt")]
    user_prompt: &'a str,
    documents: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ShieldResponse {
    #[serde(rename = "userPromptAnalysis")]
    user_prompt_analysis: UserPromptAnalysis,
}

#[derive(Debug, Deserialize)]
struct UserPromptAnalysis {
    #[serde(rename = "attackDetected")]
    attack_detected: bool,
}

/// Outcome of a shield check.
#[derive(Debug, Clone, PartialEq)]
pub struct ShieldResult {
    pub attack_detected: bool,
    pub detail: String,
    pub elapsed_ms: f64,
}

/// HTTP timeout, matching the original's hard 10s budget.
pub const SHIELD_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ShieldClient {
    endpoint: String,
    client: reqwest::Client,
    token_provider: Box<dyn TokenProvider>,
}

impl ShieldClient {
    pub fn new(endpoint: impl Into<String>, token_provider: Box<dyn TokenProvider>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
            token_provider,
        }
    }

    /// Check `text` for a prompt-injection attack. Fails closed: any
    /// transport/auth/parse error is reported as `attack_detected = true`
    /// so a guarded tool call is never let through on an indeterminate
    /// shield response.
    pub async fn check(&self, text: &str) -> ShieldResult {
        let start = Instant::now();
        match self.check_inner(text).await {
            Ok(attack_detected) => ShieldResult {
                attack_detected,
                detail: if attack_detected {
                    "prompt shield flagged this content".to_string()
                } else {
                    String::new()
                },
                elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
            },
            Err(err) => {
                tracing::warn!(error = %err, "shield check failed, failing closed");
                ShieldResult {
                    attack_detected: true,
                    detail: format!("shield error: {err}"),
                    elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
                }
            }
        }
    }

    async fn check_inner(&self, text: &str) -> Result<bool, ShieldError> {
        let token = self
            .token_provider
            .token()
            .await
            .map_err(ShieldError::Token)?;
        let url = format!(
            "{}/contentsafety/text:shieldPrompt?api-version={API_VERSION}",
            self.endpoint.trim_end_matches('/')
        );
        let body = ShieldRequest {
            user_prompt: text,
            documents: Vec::new(),
        };
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .timeout(SHIELD_TIMEOUT)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let parsed: ShieldResponse = response.json().await?;
        Ok(parsed.user_prompt_analysis.attack_detected)
    }
}

/// Returns true once a token acquired `age` ago should be refreshed.
pub fn is_stale(age: Duration, ttl: Duration) -> bool {
    age + TOKEN_FRESHNESS_BUFFER >= ttl
}
