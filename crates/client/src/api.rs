//! HTTP access to the bulk email API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use forgecrm_core::{JobId, JobState, OutcomeStatus, UserId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(String),
    #[error("API error ({status}) {code}: {message}")]
    Api { status: u16, code: String, message: String },
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("parse error: {0}")]
    Parse(String),
}

impl ClientError {
    /// Worth another poll: network trouble or a server-side hiccup.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Network(_) => true,
            ClientError::Api { status, .. } => *status >= 500,
            ClientError::NotFound(_) | ClientError::Parse(_) => false,
        }
    }
}

/// Submission body, mirroring `POST /bulk-email/jobs`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitJob {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    pub template_ref: String,
    pub test_mode: bool,
    pub confirm_unfiltered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<Value>,
}

impl SubmitJob {
    pub fn for_recipients<I, S>(recipient_ids: I, template_ref: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            recipient_ids: Some(recipient_ids.into_iter().map(Into::into).collect()),
            filter: None,
            template_ref: template_ref.into(),
            test_mode: false,
            confirm_unfiltered: false,
            generation: None,
        }
    }

    pub fn for_filter(filter: Value, template_ref: impl Into<String>) -> Self {
        Self {
            recipient_ids: None,
            filter: Some(filter),
            template_ref: template_ref.into(),
            test_mode: false,
            confirm_unfiltered: false,
            generation: None,
        }
    }

    pub fn test_mode(mut self, on: bool) -> Self {
        self.test_mode = on;
        self
    }

    pub fn confirm_unfiltered(mut self) -> Self {
        self.confirm_unfiltered = true;
        self
    }

    pub fn with_ai(mut self, tone: impl Into<String>, additional_context: impl Into<String>) -> Self {
        self.generation = Some(serde_json::json!({
            "mode": "ai",
            "tone": tone.into(),
            "additional_context": additional_context.into(),
        }));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutcomeView {
    pub recipient_id: String,
    pub status: OutcomeStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub delivered_to: Option<String>,
}

/// `GET /bulk-email/jobs/:id` response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub status: JobState,
    pub total: usize,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default)]
    pub failure: Option<String>,
    #[serde(default)]
    pub outcomes: Vec<OutcomeView>,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[async_trait]
pub trait JobApi: Send + Sync {
    async fn submit(&self, job: &SubmitJob) -> Result<JobId, ClientError>;
    async fn status(&self, job_id: JobId) -> Result<JobStatus, ClientError>;
}

#[async_trait]
impl<T> JobApi for std::sync::Arc<T>
where
    T: JobApi + ?Sized,
{
    async fn submit(&self, job: &SubmitJob) -> Result<JobId, ClientError> {
        (**self).submit(job).await
    }

    async fn status(&self, job_id: JobId) -> Result<JobStatus, ClientError> {
        (**self).status(job_id).await
    }
}

/// Identity forwarded to the API in the session headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub user_id: UserId,
    pub email: Option<String>,
    pub full_name: Option<String>,
}

impl SessionIdentity {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            email: None,
            full_name: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_full_name(mut self, name: impl Into<String>) -> Self {
        self.full_name = Some(name.into());
        self
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job_id: JobId,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    message: String,
}

#[derive(Clone)]
pub struct HttpJobApi {
    base_url: String,
    identity: SessionIdentity,
    client: reqwest::Client,
}

impl HttpJobApi {
    pub fn new(base_url: impl Into<String>, identity: SessionIdentity) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            identity,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Attach the session headers to a request.
    pub(crate) fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header("x-user-id", self.identity.user_id.to_string());
        if let Some(email) = &self.identity.email {
            req = req.header("x-user-email", email);
        }
        if let Some(name) = &self.identity.full_name {
            req = req.header("x-user-name", name);
        }
        req
    }
}

async fn api_error(resp: reqwest::Response) -> ClientError {
    let status = resp.status().as_u16();
    let text = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => ClientError::Api {
            status,
            code: body.error,
            message: body.message,
        },
        Err(_) => ClientError::Api {
            status,
            code: "unknown".to_string(),
            message: text,
        },
    }
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn submit(&self, job: &SubmitJob) -> Result<JobId, ClientError> {
        let resp = self
            .request(reqwest::Method::POST, "/bulk-email/jobs")
            .json(job)
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }
        let body: SubmitResponse = resp.json().await.map_err(|e| ClientError::Parse(e.to_string()))?;
        Ok(body.job_id)
    }

    async fn status(&self, job_id: JobId) -> Result<JobStatus, ClientError> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/bulk-email/jobs/{job_id}"))
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(job_id));
        }
        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }
        resp.json().await.map_err(|e| ClientError::Parse(e.to_string()))
    }
}
