//! Bulk job model, submission request and delivery retry policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgecrm_core::{
    DomainError, DomainResult, EmailAddress, JobId, JobState, OutcomeStatus, RecipientId, UserId,
};

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// base * 2^(attempt-1)
    #[default]
    Exponential,
}

/// Retry policy for rate-limited deliveries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (1 = never retry)
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => (base_ms * 2_f64.powi((attempt - 1) as i32)).min(max_ms),
        };

        // Deterministic spread so parallel jobs do not retry in lockstep.
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }

    /// Whether another attempt is allowed after `attempt` attempts failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// How message content is produced for a job.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum GenerationMode {
    /// Static template with field interpolation.
    #[default]
    Template,
    /// External text generation; `template_ref` names the AI system prompt.
    Ai {
        #[serde(default = "default_tone")]
        tone: String,
        #[serde(default)]
        additional_context: String,
    },
}

fn default_tone() -> String {
    "professional".to_string()
}

impl GenerationMode {
    pub fn is_ai(&self) -> bool {
        matches!(self, GenerationMode::Ai { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            GenerationMode::Template => "template",
            GenerationMode::Ai { .. } => "ai",
        }
    }
}

/// The user who submitted a job, as supplied by the session context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Initiator {
    pub user_id: UserId,
    #[serde(default)]
    pub email: Option<EmailAddress>,
    #[serde(default)]
    pub full_name: Option<String>,
}

impl Initiator {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            email: None,
            full_name: None,
        }
    }

    pub fn with_email(mut self, email: EmailAddress) -> Self {
        self.email = Some(email);
        self
    }

    pub fn with_full_name(mut self, name: impl Into<String>) -> Self {
        self.full_name = Some(name.into());
        self
    }

    /// Best human-readable name: full name, then address, then id.
    pub fn display_name(&self) -> String {
        self.full_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .or_else(|| self.email.as_ref().map(|e| e.to_string()))
            .unwrap_or_else(|| self.user_id.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("provide either recipient_ids or filter, not both")]
    Ambiguous,
    #[error("provide either recipient_ids or filter")]
    Missing,
    #[error("invalid recipient id at position {0}")]
    InvalidRecipientId(usize),
}

/// Exactly one selection mode, enforced at construction.
#[derive(Debug, Clone, PartialEq)]
pub enum RecipientSelection {
    Explicit(Vec<RecipientId>),
    Filter {
        expression: serde_json::Value,
        /// Required to accept an empty (select-everything) filter.
        confirm_unfiltered: bool,
    },
}

impl RecipientSelection {
    pub fn from_parts(
        recipient_ids: Option<Vec<String>>,
        filter: Option<serde_json::Value>,
        confirm_unfiltered: bool,
    ) -> Result<Self, SelectionError> {
        match (recipient_ids, filter) {
            (Some(_), Some(_)) => Err(SelectionError::Ambiguous),
            (None, None) => Err(SelectionError::Missing),
            (Some(raw), None) => raw
                .into_iter()
                .enumerate()
                .map(|(i, id)| RecipientId::new(id).map_err(|_| SelectionError::InvalidRecipientId(i)))
                .collect::<Result<Vec<_>, _>>()
                .map(RecipientSelection::Explicit),
            (None, Some(expression)) => Ok(RecipientSelection::Filter {
                expression,
                confirm_unfiltered,
            }),
        }
    }
}

/// Immutable submission input.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub selection: RecipientSelection,
    pub template_ref: String,
    pub test_mode: bool,
    pub generation: GenerationMode,
    pub initiator: Initiator,
}

/// One attempted recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientOutcome {
    pub recipient_id: RecipientId,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Address the message was handed to (the test address in test mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_to: Option<String>,
}

impl RecipientOutcome {
    pub fn sent(recipient_id: RecipientId, delivered_to: impl Into<String>) -> Self {
        Self {
            recipient_id,
            status: OutcomeStatus::Sent,
            error: None,
            delivered_to: Some(delivered_to.into()),
        }
    }

    pub fn failed(recipient_id: RecipientId, error: impl Into<String>) -> Self {
        Self {
            recipient_id,
            status: OutcomeStatus::Failed,
            error: Some(error.into()),
            delivered_to: None,
        }
    }

    pub fn is_sent(&self) -> bool {
        self.status == OutcomeStatus::Sent
    }
}

/// Job snapshot as persisted in the status store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobState,
    pub initiator: Initiator,
    pub test_mode: bool,
    pub template_ref: String,
    #[serde(default)]
    pub generation: GenerationMode,
    /// Resolved recipients, in resolver order.
    pub recipients: Vec<RecipientId>,
    pub total: usize,
    /// Append-only, one per attempted recipient, in `recipients` order.
    pub outcomes: Vec<RecipientOutcome>,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A freshly accepted job for an already resolved recipient list.
    pub fn queued(id: JobId, request: &JobRequest, recipients: Vec<RecipientId>) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobState::Queued,
            initiator: request.initiator.clone(),
            test_mode: request.test_mode,
            template_ref: request.template_ref.clone(),
            generation: request.generation.clone(),
            total: recipients.len(),
            recipients,
            outcomes: Vec::new(),
            progress: 0,
            failure: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.initiator.user_id
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn sent_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_sent()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.sent_count()
    }

    /// Recipients that have no outcome yet, in order.
    pub fn pending_recipients(&self) -> &[RecipientId] {
        let done = self.outcomes.len().min(self.recipients.len());
        &self.recipients[done..]
    }

    pub fn mark_running(&mut self) -> DomainResult<()> {
        match self.status {
            JobState::Queued => {
                self.status = JobState::Running;
                self.touch();
                Ok(())
            }
            JobState::Running => Ok(()),
            other => Err(DomainError::invalid_transition(format!("{other} -> running"))),
        }
    }

    /// Append the outcome for the next pending recipient.
    pub fn record_outcome(&mut self, outcome: RecipientOutcome) -> DomainResult<()> {
        if self.status != JobState::Running {
            return Err(DomainError::invalid_transition(format!(
                "cannot record an outcome while {}",
                self.status
            )));
        }
        let expected = self.pending_recipients().first().ok_or_else(|| {
            DomainError::invalid_transition("every recipient already has an outcome")
        })?;
        if *expected != outcome.recipient_id {
            return Err(DomainError::validation(format!(
                "outcome for {} out of order; next recipient is {expected}",
                outcome.recipient_id
            )));
        }

        self.outcomes.push(outcome);
        self.progress = percent(self.outcomes.len(), self.total);
        self.touch();
        Ok(())
    }

    /// Terminal transition once every recipient was attempted.
    pub fn settle(&mut self) -> DomainResult<JobState> {
        if self.is_terminal() {
            return Err(DomainError::invalid_transition(format!("{} is terminal", self.status)));
        }
        if !self.pending_recipients().is_empty() {
            return Err(DomainError::invalid_transition(format!(
                "{} recipient(s) still pending",
                self.pending_recipients().len()
            )));
        }
        let state = JobState::settle(self.sent_count(), self.failed_count());
        self.finish(state);
        Ok(state)
    }

    /// Whole-job failure (infrastructure loss, unexpected runner error).
    pub fn abort(&mut self, reason: impl Into<String>) -> DomainResult<()> {
        if self.is_terminal() {
            return Err(DomainError::invalid_transition(format!("{} is terminal", self.status)));
        }
        self.failure = Some(reason.into());
        self.finish(JobState::Failed);
        Ok(())
    }

    fn finish(&mut self, state: JobState) {
        self.status = state;
        self.progress = 100;
        self.completed_at = Some(Utc::now());
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done * 100) / total).min(100) as u8
}
