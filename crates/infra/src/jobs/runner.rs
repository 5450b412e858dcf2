//! Job Runner: accepts requests, then drives each job to a terminal state in
//! the background.
//!
//! Per job, recipients are processed strictly in resolver order, one at a
//! time, and the snapshot is persisted after every recipient. Generation and
//! delivery failures are recorded as outcomes; only a status-store failure
//! (or a crashed task) aborts the job.
//!
//! A worker only touches a job while it holds the job's run lease in the
//! status store. The lease is renewed before every recipient, so two API
//! instances sharing one store never deliver to the same recipient twice.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{error, info, warn};

use forgecrm_core::{JobId, RecipientId};
use forgecrm_events::JobTerminalEvent;

use super::notifier::StatusNotifier;
use super::store::{JobStatusStore, JobStoreError};
use super::types::{Job, JobRequest, RecipientOutcome, SelectionError};
use crate::messaging::{DeliverySender, MessageGenerator};
use crate::recipients::{RecipientResolver, ResolutionError, ResolveError};

/// Submission-time failure. No job record exists and no job id is issued.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    SelectionMode(#[from] SelectionError),
    #[error(transparent)]
    Resolution(ResolutionError),
    #[error("no recipients matched the selection")]
    EmptySelection,
    #[error("infrastructure failure: {0}")]
    Infrastructure(String),
}

impl From<ResolveError> for SubmitError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::Resolution(e) => SubmitError::Resolution(e),
            ResolveError::EmptySelection => SubmitError::EmptySelection,
            ResolveError::Records(e) => SubmitError::Infrastructure(e.to_string()),
        }
    }
}

/// How long a run lease lives without renewal. It must outlast the slowest
/// single recipient (generation timeout plus delivery retries).
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    #[error("job {0} is already running in this process")]
    AlreadyActive(JobId),
    #[error("job {0} is being run by another worker")]
    Leased(JobId),
    #[error("job {0} is already terminal")]
    AlreadyTerminal(JobId),
    #[error(transparent)]
    Store(#[from] JobStoreError),
}

struct Inner {
    resolver: RecipientResolver,
    generator: MessageGenerator,
    sender: DeliverySender,
    store: Arc<dyn JobStatusStore>,
    notifier: Arc<dyn StatusNotifier>,
    send_interval: Duration,
    lease_ttl: Duration,
    /// Lease owner name of this runner instance.
    owner: String,
    active: Mutex<HashSet<JobId>>,
}

/// Cheap to clone; clones share the active-job set.
#[derive(Clone)]
pub struct BulkEmailRunner {
    inner: Arc<Inner>,
}

impl BulkEmailRunner {
    pub fn new(
        resolver: RecipientResolver,
        generator: MessageGenerator,
        sender: DeliverySender,
        store: Arc<dyn JobStatusStore>,
        notifier: Arc<dyn StatusNotifier>,
        send_interval: Duration,
        lease_ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                resolver,
                generator,
                sender,
                store,
                notifier,
                send_interval,
                lease_ttl,
                owner: format!("runner-{}", uuid::Uuid::now_v7()),
                active: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn owner(&self) -> &str {
        &self.inner.owner
    }

    pub fn store(&self) -> Arc<dyn JobStatusStore> {
        Arc::clone(&self.inner.store)
    }

    pub fn generator(&self) -> &MessageGenerator {
        &self.inner.generator
    }

    pub fn active_jobs(&self) -> Vec<JobId> {
        self.inner
            .active
            .lock()
            .map(|a| a.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Resolve recipients, persist a `queued` job and start it in the
    /// background. Returns before any recipient is processed.
    pub async fn submit(&self, request: JobRequest) -> Result<JobId, SubmitError> {
        let recipients = self.inner.resolver.resolve(&request.selection)?;

        let job = Job::queued(JobId::new(), &request, recipients);
        let job_id = job.id;
        let leased = self
            .inner
            .store
            .try_claim(job_id, &self.inner.owner, self.inner.lease_ttl)
            .await
            .map_err(|e| SubmitError::Infrastructure(e.to_string()))?;
        if !leased {
            return Err(SubmitError::Infrastructure(format!("job id {job_id} is already leased")));
        }
        if let Err(e) = self.inner.store.put(&job).await {
            self.inner.release_lease(job_id).await;
            return Err(SubmitError::Infrastructure(e.to_string()));
        }

        info!(
            %job_id,
            user_id = %job.user_id(),
            total = job.total,
            test_mode = job.test_mode,
            template = %job.template_ref,
            mode = job.generation.label(),
            "bulk email job accepted"
        );

        if !self.claim(job_id) {
            // Fresh ids cannot collide; treat it as a bug in the store wiring.
            return Err(SubmitError::Infrastructure(format!("job id {job_id} already active")));
        }
        self.spawn(job);
        Ok(job_id)
    }

    /// Continue a non-terminal job left behind by a stopped worker. Only
    /// recipients without an outcome are processed. Refused while any worker,
    /// here or in another process, holds the job's lease.
    pub async fn resume(&self, job_id: JobId) -> Result<(), ResumeError> {
        if self.is_active(job_id) {
            return Err(ResumeError::AlreadyActive(job_id));
        }
        if !self
            .inner
            .store
            .try_claim(job_id, &self.inner.owner, self.inner.lease_ttl)
            .await?
        {
            return Err(ResumeError::Leased(job_id));
        }

        // Read under the lease so outcomes recorded by the previous holder are seen.
        let job = match self.inner.store.get(job_id).await {
            Ok(job) if job.is_terminal() => {
                self.inner.release_lease(job_id).await;
                return Err(ResumeError::AlreadyTerminal(job_id));
            }
            Ok(job) => job,
            Err(e) => {
                self.inner.release_lease(job_id).await;
                return Err(e.into());
            }
        };
        if !self.claim(job_id) {
            // A sibling task of this runner won the race; the lease is its too.
            return Err(ResumeError::AlreadyActive(job_id));
        }
        info!(%job_id, remaining = job.pending_recipients().len(), "resuming bulk email job");
        self.spawn(job);
        Ok(())
    }

    fn is_active(&self, job_id: JobId) -> bool {
        self.inner.active.lock().map(|a| a.contains(&job_id)).unwrap_or(false)
    }

    fn claim(&self, job_id: JobId) -> bool {
        self.inner.active.lock().map(|mut a| a.insert(job_id)).unwrap_or(false)
    }

    fn spawn(&self, job: Job) {
        let inner = Arc::clone(&self.inner);
        let job_id = job.id;
        let worker = tokio::spawn(Arc::clone(&inner).run(job));

        tokio::spawn(async move {
            if let Err(e) = worker.await {
                error!(%job_id, error = %e, "bulk email task crashed");
                inner.fail_after_crash(job_id, format!("runner task crashed: {e}")).await;
            }
            inner.release_lease(job_id).await;
            if let Ok(mut active) = inner.active.lock() {
                active.remove(&job_id);
            }
        });
    }
}

impl Inner {
    async fn run(self: Arc<Self>, mut job: Job) {
        let job_id = job.id;

        if let Err(e) = job.mark_running() {
            warn!(%job_id, error = %e, "job cannot start");
            return;
        }
        if let Err(e) = self.store.put(&job).await {
            return self.abort(job, e).await;
        }

        let pending: Vec<RecipientId> = job.pending_recipients().to_vec();
        let last = pending.len().saturating_sub(1);
        for (i, recipient) in pending.into_iter().enumerate() {
            match self.store.try_claim(job_id, &self.owner, self.lease_ttl).await {
                Ok(true) => {}
                Ok(false) => {
                    error!(%job_id, %recipient, "run lease lost to another worker; stopping");
                    return;
                }
                Err(e) => return self.abort(job, e).await,
            }

            let outcome = self.process(&recipient, &job).await;
            match &outcome.error {
                None => info!(%job_id, %recipient, progress = job.outcomes.len() + 1, total = job.total, "sent"),
                Some(err) => warn!(%job_id, %recipient, error = %err, "recipient failed"),
            }

            if let Err(e) = job.record_outcome(outcome) {
                error!(%job_id, error = %e, "outcome rejected by job state");
                return self.abort(job, JobStoreError::Storage(e.to_string())).await;
            }
            if let Err(e) = self.store.put(&job).await {
                return self.abort(job, e).await;
            }

            if i < last && !self.send_interval.is_zero() {
                tokio::time::sleep(self.send_interval).await;
            }
        }

        let state = match job.settle() {
            Ok(state) => state,
            Err(e) => {
                error!(%job_id, error = %e, "job could not settle");
                return;
            }
        };
        if let Err(e) = self.store.put(&job).await {
            error!(%job_id, error = %e, "failed to persist terminal state");
            // The in-memory snapshot is terminal; tell live clients anyway.
        }

        info!(
            %job_id,
            status = %state,
            sent = job.sent_count(),
            failed = job.failed_count(),
            "bulk email job finished"
        );
        self.notify(&job).await;
    }

    async fn release_lease(&self, job_id: JobId) {
        if let Err(e) = self.store.release(job_id, &self.owner).await {
            warn!(%job_id, error = %e, "could not release run lease; it will expire");
        }
    }

    async fn process(&self, recipient: &RecipientId, job: &Job) -> RecipientOutcome {
        let message = match self.generator.generate(recipient, job).await {
            Ok(message) => message,
            Err(e) => return RecipientOutcome::failed(recipient.clone(), e.failure.to_string()),
        };
        match self.sender.deliver(&message).await {
            Ok(receipt) => RecipientOutcome::sent(recipient.clone(), receipt.delivered_to),
            Err(e) => RecipientOutcome::failed(recipient.clone(), e.to_string()),
        }
    }

    /// Whole-job failure after losing the status store.
    async fn abort(&self, mut job: Job, cause: JobStoreError) {
        let job_id = job.id;
        error!(%job_id, error = %cause, "aborting bulk email job");
        if job.abort(format!("status store failure: {cause}")).is_err() {
            return;
        }
        if let Err(e) = self.store.put(&job).await {
            error!(%job_id, error = %e, "could not record job failure");
        }
        self.notify(&job).await;
    }

    async fn fail_after_crash(&self, job_id: JobId, reason: String) {
        let mut job = match self.store.get(job_id).await {
            Ok(job) => job,
            Err(e) => {
                error!(%job_id, error = %e, "cannot load crashed job");
                return;
            }
        };
        if job.abort(reason).is_ok() {
            if let Err(e) = self.store.put(&job).await {
                error!(%job_id, error = %e, "could not record job failure");
            }
            self.notify(&job).await;
        }
    }

    async fn notify(&self, job: &Job) {
        let event = JobTerminalEvent::new(
            job.id,
            job.user_id(),
            job.status,
            job.sent_count(),
            job.failed_count(),
        );
        if let Err(e) = self.notifier.publish(event).await {
            warn!(job_id = %job.id, error = %e, "terminal event not delivered; pollers will catch up");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use forgecrm_core::{EmailAddress, JobState, UserId};
    use proptest::prelude::*;
    use serde_json::json;

    use crate::jobs::notifier::InMemoryStatusNotifier;
    use crate::jobs::store::InMemoryJobStatusStore;
    use crate::jobs::types::{GenerationMode, Initiator, RecipientSelection, RetryPolicy};
    use crate::messaging::{EmailShell, EmailTemplate, InMemoryMailTransport, TemplateCatalog};
    use crate::records::InMemoryRecordStore;

    struct Harness {
        runner: BulkEmailRunner,
        store: Arc<InMemoryJobStatusStore>,
        transport: Arc<InMemoryMailTransport>,
        notifier: Arc<InMemoryStatusNotifier>,
    }

    fn leads() -> serde_json::Value {
        json!([
            { "name": "A", "first_name": "Ada", "email": "ada@analytical.test", "status": "New" },
            { "name": "B", "first_name": "Bob", "email": "bob@builders.test", "status": "New" },
            { "name": "C", "first_name": "Cy", "email": "cy@cyber.test", "status": "Junk" },
            { "name": "N", "first_name": "Nemo", "status": "New" },
        ])
    }

    fn templates() -> Arc<TemplateCatalog> {
        let mut templates = TemplateCatalog::new();
        templates
            .insert(EmailTemplate {
                name: "welcome".to_string(),
                subject: "Welcome {{doc.first_name}}".to_string(),
                body: "<p>Hi {{doc.first_name}}</p>".to_string(),
            })
            .unwrap();
        Arc::new(templates)
    }

    /// A runner instance over shared collaborators, as another API process would build it.
    fn runner_on(
        store: Arc<dyn JobStatusStore>,
        transport: Arc<InMemoryMailTransport>,
        notifier: Arc<InMemoryStatusNotifier>,
        send_interval: Duration,
    ) -> BulkEmailRunner {
        let records = Arc::new(InMemoryRecordStore::from_json(leads()).unwrap());
        BulkEmailRunner::new(
            RecipientResolver::new(records.clone(), 100),
            MessageGenerator::new(records, templates(), EmailShell::new("Forge CRM")),
            DeliverySender::new(transport, RetryPolicy::fixed(2, Duration::from_millis(1))),
            store,
            notifier,
            send_interval,
            DEFAULT_LEASE_TTL,
        )
    }

    fn harness_with(store: Arc<dyn JobStatusStore>, mem: Arc<InMemoryJobStatusStore>, transport: InMemoryMailTransport) -> Harness {
        let transport = Arc::new(transport);
        let notifier = Arc::new(InMemoryStatusNotifier::new());
        let runner = runner_on(store, transport.clone(), notifier.clone(), Duration::ZERO);
        Harness {
            runner,
            store: mem,
            transport,
            notifier,
        }
    }

    fn harness() -> Harness {
        let store = InMemoryJobStatusStore::arc();
        harness_with(store.clone(), store, InMemoryMailTransport::new())
    }

    fn grace() -> Initiator {
        Initiator::new(UserId::new())
            .with_email(EmailAddress::parse("grace@forge.test").unwrap())
            .with_full_name("Grace")
    }

    fn request(ids: &[&str], test_mode: bool) -> JobRequest {
        JobRequest {
            selection: RecipientSelection::Explicit(ids.iter().map(|s| RecipientId::new(*s).unwrap()).collect()),
            template_ref: "welcome".to_string(),
            test_mode,
            generation: GenerationMode::Template,
            initiator: grace(),
        }
    }

    async fn wait_terminal(store: &dyn JobStatusStore, job_id: JobId) -> Job {
        for _ in 0..400 {
            if let Ok(job) = store.get(job_id).await {
                if job.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {job_id} did not finish");
    }

    fn ids(job: &Job) -> Vec<&str> {
        job.outcomes.iter().map(|o| o.recipient_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_mode_job_delivers_everything_to_the_initiator() {
        let h = harness();
        let job_id = h.runner.submit(request(&["A", "B", "C"], true)).await.unwrap();

        let job = wait_terminal(h.store.as_ref(), job_id).await;
        assert_eq!(job.status, JobState::Finished);
        assert_eq!(job.total, 3);
        assert_eq!(ids(&job), ["A", "B", "C"]);
        assert!(job.outcomes.iter().all(|o| o.delivered_to.as_deref() == Some("grace@forge.test")));
        assert!(h.transport.sent().iter().all(|m| m.recipient == "grace@forge.test"));

        let events = h.notifier.events();
        assert_eq!(events.len(), 1);
        assert_eq!((events[0].job_id, events[0].status, events[0].successful_count), (job_id, JobState::Finished, 3));
    }

    #[tokio::test]
    async fn one_generation_failure_completes_with_errors() {
        let h = harness();
        let job_id = h.runner.submit(request(&["A", "N", "B"], false)).await.unwrap();

        let job = wait_terminal(h.store.as_ref(), job_id).await;
        assert_eq!(job.status, JobState::CompletedWithErrors);
        assert_eq!((job.sent_count(), job.failed_count()), (2, 1));
        assert_eq!(ids(&job), ["A", "N", "B"]);
        assert_eq!(job.outcomes[1].error.as_deref(), Some("lead has no email address"));
        assert_eq!(h.transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn all_failures_settle_as_failed() {
        let h = harness();
        let job_id = h.runner.submit(request(&["N", "ghost"], false)).await.unwrap();

        let job = wait_terminal(h.store.as_ref(), job_id).await;
        assert_eq!(job.status, JobState::Failed);
        assert_eq!(job.outcomes[1].error.as_deref(), Some("lead not found"));
        assert_eq!(h.notifier.events()[0].failed_count, 2);
    }

    #[tokio::test]
    async fn delivery_rejections_are_recorded_per_recipient() {
        let store = InMemoryJobStatusStore::arc();
        let transport = InMemoryMailTransport::new()
            .fail_for("bob@builders.test", crate::messaging::TransportError::Rejected("mailbox full".into()));
        let h = harness_with(store.clone(), store, transport);

        let job_id = h.runner.submit(request(&["A", "B"], false)).await.unwrap();
        let job = wait_terminal(h.store.as_ref(), job_id).await;
        assert_eq!(job.status, JobState::CompletedWithErrors);
        assert!(job.outcomes[1].error.as_deref().unwrap().contains("mailbox full"));
    }

    #[tokio::test]
    async fn filter_with_no_matches_is_rejected_without_a_record() {
        let h = harness();
        let req = JobRequest {
            selection: RecipientSelection::Filter {
                expression: json!({ "status": "Converted" }),
                confirm_unfiltered: false,
            },
            ..request(&[], false)
        };

        assert!(matches!(h.runner.submit(req).await, Err(SubmitError::EmptySelection)));
        assert!(h.store.is_empty());
        assert!(h.notifier.events().is_empty());
    }

    #[tokio::test]
    async fn filter_selection_runs_in_natural_order() {
        let h = harness();
        let req = JobRequest {
            selection: RecipientSelection::Filter {
                expression: json!([["status", "=", "New"], ["email", "is", "set"]]),
                confirm_unfiltered: false,
            },
            ..request(&[], true)
        };
        let job_id = h.runner.submit(req).await.unwrap();
        let job = wait_terminal(h.store.as_ref(), job_id).await;
        assert_eq!(ids(&job), ["A", "B"]);
    }

    #[tokio::test]
    async fn malformed_filter_is_a_resolution_error() {
        let h = harness();
        let req = JobRequest {
            selection: RecipientSelection::Filter {
                expression: json!({ "status": ["between", 1] }),
                confirm_unfiltered: false,
            },
            ..request(&[], false)
        };
        assert!(matches!(h.runner.submit(req).await, Err(SubmitError::Resolution(_))));
        assert!(h.store.is_empty());
    }

    /// Fails every `put` after the first `ok` writes.
    struct FlakyStore {
        inner: Arc<InMemoryJobStatusStore>,
        ok: Mutex<usize>,
    }

    #[async_trait]
    impl JobStatusStore for FlakyStore {
        async fn put(&self, job: &Job) -> Result<(), JobStoreError> {
            let allowed = {
                let mut ok = self.ok.lock().unwrap();
                if *ok == 0 {
                    false
                } else {
                    *ok -= 1;
                    true
                }
            };
            if allowed || job.is_terminal() {
                self.inner.put(job).await
            } else {
                Err(JobStoreError::Storage("connection refused".to_string()))
            }
        }

        async fn get(&self, job_id: JobId) -> Result<Job, JobStoreError> {
            self.inner.get(job_id).await
        }

        async fn list_for_user(&self, user_id: forgecrm_core::UserId, limit: usize) -> Result<Vec<Job>, JobStoreError> {
            self.inner.list_for_user(user_id, limit).await
        }

        async fn try_claim(&self, job_id: JobId, owner: &str, ttl: Duration) -> Result<bool, JobStoreError> {
            self.inner.try_claim(job_id, owner, ttl).await
        }

        async fn release(&self, job_id: JobId, owner: &str) -> Result<(), JobStoreError> {
            self.inner.release(job_id, owner).await
        }
    }

    #[tokio::test]
    async fn losing_the_status_store_aborts_the_job() {
        let mem = InMemoryJobStatusStore::arc();
        // queued + running + first outcome succeed, second outcome write fails.
        let flaky = Arc::new(FlakyStore {
            inner: mem.clone(),
            ok: Mutex::new(3),
        });
        let h = harness_with(flaky, mem, InMemoryMailTransport::new());

        let job_id = h.runner.submit(request(&["A", "B", "C"], false)).await.unwrap();
        let job = wait_terminal(h.store.as_ref(), job_id).await;

        assert_eq!(job.status, JobState::Failed);
        assert!(job.failure.as_deref().unwrap().contains("connection refused"));
        assert_eq!(ids(&job), ["A", "B"]);
        assert_eq!(h.transport.sent().len(), 2);
        assert_eq!(h.notifier.events()[0].status, JobState::Failed);
    }

    #[tokio::test]
    async fn resume_processes_only_pending_recipients() {
        let h = harness();
        let req = request(&["A", "B", "C"], false);
        let ids_in_order: Vec<RecipientId> = ["A", "B", "C"].iter().map(|s| RecipientId::new(*s).unwrap()).collect();

        // A worker that stopped after the first recipient.
        let mut job = Job::queued(JobId::new(), &req, ids_in_order);
        job.mark_running().unwrap();
        job.record_outcome(RecipientOutcome::sent(RecipientId::new("A").unwrap(), "ada@analytical.test"))
            .unwrap();
        h.store.put(&job).await.unwrap();

        h.runner.resume(job.id).await.unwrap();
        let done = wait_terminal(h.store.as_ref(), job.id).await;

        assert_eq!(done.status, JobState::Finished);
        assert_eq!(ids(&done), ["A", "B", "C"]);
        let delivered: Vec<String> = h.transport.sent().into_iter().map(|m| m.recipient).collect();
        assert_eq!(delivered, ["bob@builders.test", "cy@cyber.test"]);

        assert!(matches!(h.runner.resume(job.id).await, Err(ResumeError::AlreadyTerminal(_))));
        assert!(matches!(
            h.runner.resume(JobId::new()).await,
            Err(ResumeError::Store(JobStoreError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn active_jobs_cannot_be_resumed_twice() {
        let store = InMemoryJobStatusStore::arc();
        let runner = runner_on(
            store.clone(),
            Arc::new(InMemoryMailTransport::new()),
            Arc::new(InMemoryStatusNotifier::new()),
            Duration::from_millis(200),
        );

        let job_id = runner.submit(request(&["A", "B", "C"], false)).await.unwrap();
        assert!(runner.active_jobs().contains(&job_id));
        assert!(matches!(runner.resume(job_id).await, Err(ResumeError::AlreadyActive(_))));

        wait_terminal(store.as_ref(), job_id).await;
    }

    #[tokio::test]
    async fn second_instance_cannot_resume_a_running_job() {
        let store = InMemoryJobStatusStore::arc();
        let transport = Arc::new(InMemoryMailTransport::new());
        let notifier = Arc::new(InMemoryStatusNotifier::new());
        let first = runner_on(store.clone(), transport.clone(), notifier.clone(), Duration::from_millis(100));
        let second = runner_on(store.clone(), transport.clone(), notifier.clone(), Duration::from_millis(100));
        assert_ne!(first.owner(), second.owner());

        let job_id = first.submit(request(&["A", "B", "C"], false)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(second.resume(job_id).await, Err(ResumeError::Leased(_))));
        assert!(second.active_jobs().is_empty());

        let job = wait_terminal(store.as_ref(), job_id).await;
        assert_eq!(job.status, JobState::Finished);
        assert_eq!(ids(&job), ["A", "B", "C"]);
        let delivered: Vec<String> = transport.sent().into_iter().map(|m| m.recipient).collect();
        assert_eq!(delivered, ["ada@analytical.test", "bob@builders.test", "cy@cyber.test"]);

        // Once the first instance is done the lease is free, and the job is terminal.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(notifier.events().len(), 1);
        assert!(matches!(second.resume(job_id).await, Err(ResumeError::AlreadyTerminal(_))));
    }

    #[tokio::test]
    async fn expired_lease_of_a_dead_worker_can_be_taken_over() {
        let h = harness();
        let ids_in_order: Vec<RecipientId> = ["A", "B"].iter().map(|s| RecipientId::new(*s).unwrap()).collect();
        let mut job = Job::queued(JobId::new(), &request(&["A", "B"], false), ids_in_order);
        job.mark_running().unwrap();
        h.store.put(&job).await.unwrap();
        assert!(h.store.try_claim(job.id, "crashed-worker", Duration::from_millis(30)).await.unwrap());

        assert!(matches!(h.runner.resume(job.id).await, Err(ResumeError::Leased(_))));
        tokio::time::sleep(Duration::from_millis(60)).await;
        h.runner.resume(job.id).await.unwrap();

        let done = wait_terminal(h.store.as_ref(), job.id).await;
        assert_eq!(done.status, JobState::Finished);
        assert_eq!(h.transport.sent().len(), 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn outcome_order_matches_resolver_order(picks in proptest::collection::vec(prop::sample::select(vec!["A", "B", "C", "N", "ghost"]), 1..8)) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let h = harness();
                let job_id = h.runner.submit(request(&picks, false)).await.unwrap();
                let job = wait_terminal(h.store.as_ref(), job_id).await;

                let mut expected: Vec<&str> = Vec::new();
                for p in &picks {
                    if !expected.contains(p) {
                        expected.push(p);
                    }
                }
                assert_eq!(ids(&job), expected);
                assert_eq!(job.status, JobState::settle(job.sent_count(), job.failed_count()));
            });
        }
    }
}
