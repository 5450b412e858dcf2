//! Background tracking of one job until its first terminal observation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use forgecrm_core::{JobId, JobState};
use forgecrm_events::JobTerminalEvent;

use crate::api::{ClientError, JobApi, JobStatus};
use crate::push::PushSource;
use crate::summary::JobSummary;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackError {
    #[error("tracking cancelled")]
    Cancelled,
    #[error(transparent)]
    Api(#[from] ClientError),
    #[error("tracker task failed: {0}")]
    Crashed(String),
}

/// Lower bound on the poll interval; shorter (or zero) values are raised to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    pub poll_interval: Duration,
    /// Consecutive transient poll failures tolerated before giving up.
    pub max_consecutive_errors: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            max_consecutive_errors: 5,
        }
    }
}

/// First terminal observation wins; every later observation is a no-op.
#[derive(Debug, Default)]
pub struct TerminalLatch {
    settled: Option<JobState>,
}

impl TerminalLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` exactly once: for the first terminal state observed.
    pub fn observe(&mut self, state: JobState) -> bool {
        if self.settled.is_some() || !state.is_terminal() {
            return false;
        }
        self.settled = Some(state);
        true
    }

    pub fn settled(&self) -> Option<JobState> {
        self.settled
    }
}

pub struct JobTracker<A> {
    api: Arc<A>,
    config: TrackerConfig,
}

impl<A> JobTracker<A>
where
    A: JobApi + 'static,
{
    pub fn new(api: Arc<A>, mut config: TrackerConfig) -> Self {
        config.poll_interval = config.poll_interval.max(MIN_POLL_INTERVAL);
        Self { api, config }
    }

    /// Spawn one task that polls on a fixed interval and polls immediately
    /// when a push event for this job arrives.
    pub fn track(&self, job_id: JobId, push: Option<Box<dyn PushSource>>) -> TrackHandle {
        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(run(Arc::clone(&self.api), self.config, job_id, push, Arc::clone(&shutdown)));
        TrackHandle {
            job_id,
            shutdown,
            task: Some(task),
        }
    }
}

/// Owns the tracking task. Dropping the handle stops it.
pub struct TrackHandle {
    job_id: JobId,
    shutdown: Arc<Notify>,
    task: Option<JoinHandle<Result<JobSummary, TrackError>>>,
}

impl TrackHandle {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn cancel(&self) {
        self.shutdown.notify_one();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|t| t.is_finished())
    }

    pub async fn wait(mut self) -> Result<JobSummary, TrackError> {
        let Some(task) = self.task.take() else {
            return Err(TrackError::Cancelled);
        };
        match task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(TrackError::Cancelled),
            Err(e) => Err(TrackError::Crashed(e.to_string())),
        }
    }
}

impl Drop for TrackHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn next_push(push: &mut Option<Box<dyn PushSource>>) -> Option<JobTerminalEvent> {
    match push {
        Some(source) => source.next_event().await,
        None => std::future::pending().await,
    }
}

async fn run<A: JobApi>(
    api: Arc<A>,
    config: TrackerConfig,
    job_id: JobId,
    mut push: Option<Box<dyn PushSource>>,
    shutdown: Arc<Notify>,
) -> Result<JobSummary, TrackError> {
    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut latch = TerminalLatch::new();
    let mut consecutive_errors = 0u32;

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                debug!(%job_id, "tracking cancelled");
                return Err(TrackError::Cancelled);
            }
            _ = ticker.tick() => {}
            event = next_push(&mut push), if push.is_some() => match event {
                Some(event) if event.job_id == job_id => {
                    debug!(%job_id, status = %event.status, "terminal event pushed; polling now");
                }
                Some(_) => continue,
                None => {
                    debug!(%job_id, "push source closed; polling only");
                    push = None;
                    continue;
                }
            },
        }

        match api.status(job_id).await {
            Ok(status) => {
                consecutive_errors = 0;
                if let Some(summary) = settle(&mut latch, status) {
                    info!(%job_id, status = %summary.status, sent = summary.sent, failed = summary.failed, "job settled");
                    return Ok(summary);
                }
            }
            Err(e) if e.is_transient() => {
                consecutive_errors += 1;
                warn!(%job_id, error = %e, consecutive_errors, "status poll failed");
                if consecutive_errors >= config.max_consecutive_errors {
                    return Err(e.into());
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn settle(latch: &mut TerminalLatch, status: JobStatus) -> Option<JobSummary> {
    latch.observe(status.status).then(|| JobSummary::from(status))
}
