//! Service wiring: records, content, collaborators, the job runner and the
//! realtime channel behind `/stream`.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};
use tracing::{info, warn};

use forgecrm_ai::{ChatCompletionsClient, ChatCompletionsConfig, SystemPromptCatalog, TextGenerator};
use forgecrm_core::UserId;
use forgecrm_events::{EventBus, InMemoryEventBus, JOB_FINISHED_TOPIC, JobTerminalEvent, Subscription};
use forgecrm_infra::BulkEmailConfig;
use forgecrm_infra::jobs::{
    BulkEmailRunner, BusStatusNotifier, InMemoryJobStatusStore, JobStatusStore, RetryPolicy, StatusNotifier,
};
use forgecrm_infra::messaging::{
    ContentSeed, DeliverySender, EmailShell, HttpMailTransport, InMemoryMailTransport, MailTransport,
    MessageGenerator, TemplateCatalog,
};
use forgecrm_infra::recipients::RecipientResolver;
use forgecrm_infra::records::{InMemoryRecordStore, RecordStore};
#[cfg(feature = "redis")]
use forgecrm_infra::{
    event_bus::{DEFAULT_CHANNEL, RedisPubSubEventBus},
    jobs::RedisJobStatusStore,
};

const REALTIME_CAPACITY: usize = 256;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

/// External collaborators the runner is assembled from.
pub struct Collaborators {
    pub records: Arc<dyn RecordStore>,
    pub templates: TemplateCatalog,
    pub prompts: SystemPromptCatalog,
    pub transport: Arc<dyn MailTransport>,
    pub mail_configured: bool,
    pub text_generator: Option<Arc<dyn TextGenerator>>,
}

impl Collaborators {
    pub fn from_config(config: &BulkEmailConfig) -> anyhow::Result<Self> {
        let records: Arc<dyn RecordStore> = match &config.leads_path {
            Some(path) => {
                let store = InMemoryRecordStore::load(path)?;
                info!(count = store.len(), path = %path.display(), "lead records loaded");
                Arc::new(store)
            }
            None => {
                warn!("FORGECRM_LEADS_PATH not set; starting with no lead records");
                Arc::new(InMemoryRecordStore::new())
            }
        };

        let (templates, prompts) = match &config.templates_path {
            Some(path) => ContentSeed::load(path)?
                .into_catalogs()
                .with_context(|| format!("invalid content in {}", path.display()))?,
            None => {
                warn!("FORGECRM_TEMPLATES_PATH not set; no email templates or AI prompts available");
                (TemplateCatalog::new(), SystemPromptCatalog::new())
            }
        };

        let transport: Arc<dyn MailTransport> = match &config.mail_endpoint {
            Some(endpoint) => Arc::new(HttpMailTransport::new(endpoint.clone(), config.mail_api_key.clone())?),
            None => {
                warn!("FORGECRM_MAIL_ENDPOINT not set; messages are recorded in memory, not sent");
                Arc::new(InMemoryMailTransport::new())
            }
        };

        let text_generator: Option<Arc<dyn TextGenerator>> = match &config.ai_api_key {
            Some(key) => {
                let mut ai_config = ChatCompletionsConfig::new(key.clone()).with_base_url(config.ai_base_url.clone());
                ai_config.title = Some(config.sender_name.clone());
                Some(Arc::new(ChatCompletionsClient::new(ai_config)?))
            }
            None => None,
        };

        Ok(Self {
            records,
            templates,
            prompts,
            transport,
            mail_configured: config.mail_endpoint.is_some(),
            text_generator,
        })
    }
}

/// What `/bulk-email/status` reports.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub ai_configured: bool,
    pub mail_configured: bool,
    pub test_email_recipient: Option<String>,
    pub status_store: &'static str,
    pub templates: Vec<String>,
}

pub struct AppServices {
    runner: BulkEmailRunner,
    realtime_tx: broadcast::Sender<JobTerminalEvent>,
    status: ServiceStatus,
}

impl AppServices {
    pub async fn build(config: &BulkEmailConfig, collaborators: Collaborators) -> anyhow::Result<Self> {
        // Realtime channel (SSE): lossy broadcast, user-filtered in handlers.
        let (realtime_tx, _realtime_rx) = broadcast::channel::<JobTerminalEvent>(REALTIME_CAPACITY);

        let (store, notifier, backend) = build_status_backend(config, realtime_tx.clone()).await?;

        let Collaborators {
            records,
            templates,
            prompts,
            transport,
            mail_configured,
            text_generator,
        } = collaborators;

        let template_names = templates.names().map(str::to_string).collect();
        let mut generator = MessageGenerator::new(
            Arc::clone(&records),
            Arc::new(templates),
            EmailShell::new(config.sender_name.clone()),
        )
        .with_generation_timeout(config.generation_timeout)
        .with_test_recipient(config.test_email_recipient.clone());
        if let Some(ai) = text_generator {
            generator = generator.with_ai(ai, Arc::new(prompts), Some(config.ai_model.clone()));
        }

        let retry = RetryPolicy::exponential(config.delivery_max_attempts, RETRY_BASE_DELAY, RETRY_MAX_DELAY);
        let runner = BulkEmailRunner::new(
            RecipientResolver::new(records, config.max_filter_recipients),
            generator,
            DeliverySender::new(transport, retry),
            store,
            notifier,
            config.send_interval,
            config.job_lease,
        );

        let status = ServiceStatus {
            ai_configured: runner.generator().ai_available(),
            mail_configured,
            test_email_recipient: config.test_email_recipient.as_ref().map(|e| e.to_string()),
            status_store: backend,
            templates: template_names,
        };
        info!(
            ai = status.ai_configured,
            mail = status.mail_configured,
            store = status.status_store,
            "bulk email services ready"
        );

        Ok(Self {
            runner,
            realtime_tx,
            status,
        })
    }

    pub fn runner(&self) -> &BulkEmailRunner {
        &self.runner
    }

    pub fn status(&self) -> &ServiceStatus {
        &self.status
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobTerminalEvent> {
        self.realtime_tx.subscribe()
    }
}

type StatusBackend = (Arc<dyn JobStatusStore>, Arc<dyn StatusNotifier>, &'static str);

async fn build_status_backend(
    config: &BulkEmailConfig,
    realtime_tx: broadcast::Sender<JobTerminalEvent>,
) -> anyhow::Result<StatusBackend> {
    if let Some(redis_url) = &config.redis_url {
        #[cfg(feature = "redis")]
        {
            let store = RedisJobStatusStore::connect(redis_url, config.job_ttl)
                .await
                .context("connecting the redis job status store")?;
            let bus = Arc::new(RedisPubSubEventBus::new(redis_url, DEFAULT_CHANNEL)?);
            forward_events(bus.subscribe(), realtime_tx)?;
            let store: Arc<dyn JobStatusStore> = Arc::new(store);
            let notifier: Arc<dyn StatusNotifier> = Arc::new(BusStatusNotifier::new(bus));
            return Ok((store, notifier, "redis"));
        }
        #[cfg(not(feature = "redis"))]
        {
            warn!(%redis_url, "FORGECRM_REDIS_URL set but redis feature not enabled, falling back to in-memory");
        }
    }

    let bus = Arc::new(InMemoryEventBus::<JobTerminalEvent>::new());
    forward_events(bus.subscribe(), realtime_tx)?;
    let store: Arc<dyn JobStatusStore> = InMemoryJobStatusStore::arc();
    let notifier: Arc<dyn StatusNotifier> = Arc::new(BusStatusNotifier::new(bus));
    Ok((store, notifier, "memory"))
}

/// Background subscriber: bus -> realtime broadcast.
fn forward_events(
    subscription: Subscription<JobTerminalEvent>,
    realtime_tx: broadcast::Sender<JobTerminalEvent>,
) -> anyhow::Result<()> {
    std::thread::Builder::new()
        .name("terminal-event-forwarder".to_string())
        .spawn(move || {
            while let Ok(event) = subscription.recv() {
                // No connected clients is fine; pollers still see the state.
                let _ = realtime_tx.send(event);
            }
        })
        .context("spawning the terminal event forwarder")?;
    Ok(())
}

/// SSE stream of terminal events for one user (used by `/stream`).
pub fn user_sse_stream(
    services: Arc<AppServices>,
    user_id: UserId,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(event) if event.is_for(user_id) => {
            let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(JOB_FINISHED_TOPIC).data(data)))
        }
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
