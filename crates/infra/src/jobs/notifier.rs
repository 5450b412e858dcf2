//! Status Notifier: best-effort push of terminal job events.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use forgecrm_events::{EventBus, JobTerminalEvent};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("notification not delivered: {0}")]
pub struct NotifyError(pub String);

/// Delivery is not guaranteed; polling the status store stays authoritative.
#[async_trait]
pub trait StatusNotifier: Send + Sync {
    async fn publish(&self, event: JobTerminalEvent) -> Result<(), NotifyError>;
}

#[async_trait]
impl<N> StatusNotifier for Arc<N>
where
    N: StatusNotifier + ?Sized,
{
    async fn publish(&self, event: JobTerminalEvent) -> Result<(), NotifyError> {
        (**self).publish(event).await
    }
}

/// Collects events in memory (tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryStatusNotifier {
    events: Mutex<Vec<JobTerminalEvent>>,
}

impl InMemoryStatusNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<JobTerminalEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl StatusNotifier for InMemoryStatusNotifier {
    async fn publish(&self, event: JobTerminalEvent) -> Result<(), NotifyError> {
        self.events
            .lock()
            .map_err(|_| NotifyError("lock poisoned".to_string()))?
            .push(event);
        Ok(())
    }
}

/// Publishes onto an [`EventBus`] (in-memory or Redis pub/sub).
///
/// Bus publishing is synchronous and may do network IO, so it runs on the
/// blocking pool.
pub struct BusStatusNotifier<B> {
    bus: Arc<B>,
}

impl<B> BusStatusNotifier<B> {
    pub fn new(bus: Arc<B>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl<B> StatusNotifier for BusStatusNotifier<B>
where
    B: EventBus<JobTerminalEvent> + 'static,
{
    async fn publish(&self, event: JobTerminalEvent) -> Result<(), NotifyError> {
        let bus = Arc::clone(&self.bus);
        let job_id = event.job_id;
        tokio::task::spawn_blocking(move || bus.publish(event))
            .await
            .map_err(|e| NotifyError(format!("publish task failed: {e}")))?
            .map_err(|e| NotifyError(format!("{e:?}")))?;
        debug!(%job_id, "terminal event published");
        Ok(())
    }
}
