//! Environment-driven configuration, read once at startup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use forgecrm_ai::generator::DEFAULT_MODEL;
use forgecrm_ai::openai::DEFAULT_BASE_URL;
use forgecrm_core::EmailAddress;

use crate::jobs::DEFAULT_LEASE_TTL;

#[derive(Debug, Clone, PartialEq)]
pub struct BulkEmailConfig {
    pub bind_addr: String,
    pub redis_url: Option<String>,
    pub job_ttl: Duration,
    pub send_interval: Duration,
    pub job_lease: Duration,
    pub generation_timeout: Duration,
    pub max_filter_recipients: usize,
    pub delivery_max_attempts: u32,
    pub test_email_recipient: Option<EmailAddress>,
    pub sender_name: String,
    pub ai_base_url: String,
    pub ai_api_key: Option<String>,
    pub ai_model: String,
    pub mail_endpoint: Option<String>,
    pub mail_api_key: Option<String>,
    pub leads_path: Option<PathBuf>,
    pub templates_path: Option<PathBuf>,
}

impl Default for BulkEmailConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            redis_url: None,
            job_ttl: Duration::from_secs(86_400),
            send_interval: Duration::from_millis(200),
            job_lease: DEFAULT_LEASE_TTL,
            generation_timeout: Duration::from_secs(60),
            max_filter_recipients: 1000,
            delivery_max_attempts: 3,
            test_email_recipient: None,
            sender_name: "Forge CRM".to_string(),
            ai_base_url: DEFAULT_BASE_URL.to_string(),
            ai_api_key: None,
            ai_model: DEFAULT_MODEL.to_string(),
            mail_endpoint: None,
            mail_api_key: None,
            leads_path: None,
            templates_path: None,
        }
    }
}

impl BulkEmailConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to the
    /// default with a warning rather than failing startup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let d = Self::default();

        let test_email_recipient = get("FORGECRM_TEST_EMAIL_RECIPIENT").and_then(|raw| {
            EmailAddress::parse(&raw)
                .map_err(|e| warn!(error = %e, "ignoring FORGECRM_TEST_EMAIL_RECIPIENT"))
                .ok()
        });

        Self {
            bind_addr: get("FORGECRM_BIND_ADDR").unwrap_or(d.bind_addr),
            redis_url: get("FORGECRM_REDIS_URL"),
            job_ttl: Duration::from_secs(parsed(&get, "FORGECRM_JOB_TTL_SECS", d.job_ttl.as_secs())),
            send_interval: Duration::from_millis(parsed(
                &get,
                "FORGECRM_SEND_INTERVAL_MS",
                d.send_interval.as_millis() as u64,
            )),
            job_lease: Duration::from_secs(parsed(&get, "FORGECRM_JOB_LEASE_SECS", d.job_lease.as_secs()).max(1)),
            generation_timeout: Duration::from_secs(parsed(
                &get,
                "FORGECRM_GENERATION_TIMEOUT_SECS",
                d.generation_timeout.as_secs(),
            )),
            max_filter_recipients: parsed(&get, "FORGECRM_MAX_FILTER_RECIPIENTS", d.max_filter_recipients),
            delivery_max_attempts: parsed(&get, "FORGECRM_DELIVERY_MAX_ATTEMPTS", d.delivery_max_attempts),
            test_email_recipient,
            sender_name: get("FORGECRM_SENDER_NAME").unwrap_or(d.sender_name),
            ai_base_url: get("FORGECRM_AI_BASE_URL").unwrap_or(d.ai_base_url),
            ai_api_key: get("FORGECRM_AI_API_KEY"),
            ai_model: get("FORGECRM_AI_MODEL").unwrap_or(d.ai_model),
            mail_endpoint: get("FORGECRM_MAIL_ENDPOINT"),
            mail_api_key: get("FORGECRM_MAIL_API_KEY"),
            leads_path: get("FORGECRM_LEADS_PATH").map(PathBuf::from),
            templates_path: get("FORGECRM_TEMPLATES_PATH").map(PathBuf::from),
        }
    }

    pub fn ai_enabled(&self) -> bool {
        self.ai_api_key.is_some()
    }
}

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match get(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "unparseable configuration value; using default");
            default
        }),
        None => default,
    }
}
