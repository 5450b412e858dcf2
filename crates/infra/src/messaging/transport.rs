//! Outbound mail collaborators.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Single-message send request: `{recipient, subject, body}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMail {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("rejected by mail provider: {0}")]
    Rejected(String),
    #[error("rate limited by mail provider: {0}")]
    RateLimited(String),
    #[error("mail provider unavailable: {0}")]
    Unavailable(String),
}

/// "Send one message". Not assumed to deduplicate repeated sends.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &OutboundMail) -> Result<(), TransportError>;
}

#[async_trait]
impl<T> MailTransport for std::sync::Arc<T>
where
    T: MailTransport + ?Sized,
{
    async fn send(&self, mail: &OutboundMail) -> Result<(), TransportError> {
        (**self).send(mail).await
    }
}

#[derive(Debug, Default)]
struct Script {
    /// Permanent failures by recipient address.
    failures: HashMap<String, TransportError>,
    /// Upcoming sends (any recipient) answered with RateLimited.
    rate_limited: u32,
}

/// Records every accepted message; failures can be scripted for tests.
#[derive(Debug, Default)]
pub struct InMemoryMailTransport {
    sent: Mutex<Vec<OutboundMail>>,
    attempts: Mutex<u32>,
    script: Mutex<Script>,
}

impl InMemoryMailTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(self, recipient: impl Into<String>, error: TransportError) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.failures.insert(recipient.into(), error);
        }
        self
    }

    pub fn rate_limit_next(self, count: u32) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.rate_limited = count;
        }
        self
    }

    pub fn sent(&self) -> Vec<OutboundMail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Every call to `send`, accepted or not.
    pub fn attempts(&self) -> u32 {
        self.attempts.lock().map(|a| *a).unwrap_or(0)
    }
}

#[async_trait]
impl MailTransport for InMemoryMailTransport {
    async fn send(&self, mail: &OutboundMail) -> Result<(), TransportError> {
        *self.attempts.lock().map_err(poisoned)? += 1;
        {
            let mut script = self.script.lock().map_err(poisoned)?;
            if script.rate_limited > 0 {
                script.rate_limited -= 1;
                return Err(TransportError::RateLimited("scripted".to_string()));
            }
            if let Some(error) = script.failures.get(&mail.recipient) {
                return Err(error.clone());
            }
        }
        self.sent.lock().map_err(poisoned)?.push(mail.clone());
        Ok(())
    }
}

fn poisoned<T>(_: PoisonError<T>) -> TransportError {
    TransportError::Unavailable("lock poisoned".to_string())
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

/// Posts to an HTTP send endpoint and reads `{success, message?}`.
#[derive(Clone)]
pub struct HttpMailTransport {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpMailTransport {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TransportError::Unavailable(format!("failed to build http client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.into(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl MailTransport for HttpMailTransport {
    #[instrument(skip(self, mail), fields(recipient = %mail.recipient))]
    async fn send(&self, mail: &OutboundMail) -> Result<(), TransportError> {
        let mut request = self.client.post(&self.endpoint).json(mail);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Unavailable(format!("failed reading response: {e}")))?;
        let parsed = serde_json::from_slice::<SendResponse>(&body).ok();
        let message = parsed
            .as_ref()
            .and_then(|r| r.message.clone())
            .unwrap_or_else(|| String::from_utf8_lossy(&body).to_string());

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TransportError::RateLimited(message));
        }
        if status.is_client_error() {
            return Err(TransportError::Rejected(format!("{status}: {message}")));
        }
        if !status.is_success() {
            return Err(TransportError::Unavailable(format!("{status}: {message}")));
        }

        match parsed {
            Some(SendResponse { success: true, .. }) => Ok(()),
            Some(SendResponse { success: false, .. }) => Err(TransportError::Rejected(message)),
            None => Err(TransportError::Unavailable(format!("unexpected response: {message}"))),
        }
    }
}
