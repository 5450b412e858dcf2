//! Message Generator: one recipient + job settings → one [`Message`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, instrument};

use forgecrm_ai::{
    AiError, CompletionRequest, PromptInputs, SystemPromptCatalog, TextGenerator, build_prompt,
    parse_email_response,
};
use forgecrm_core::{EmailAddress, RecipientId};

use super::message::Message;
use super::shell::EmailShell;
use super::template::{TemplateCatalog, TemplateError};
use crate::jobs::types::{GenerationMode, Initiator, Job};
use crate::records::{LeadRecord, RecordStore};

/// Why content could not be produced for one recipient.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationFailure {
    #[error("lead not found")]
    UnknownRecipient,
    #[error("lead has no email address")]
    MissingAddress,
    #[error("test mode needs the initiating user's email address or a configured test recipient")]
    NoTestAddress,
    #[error("lead lookup failed: {0}")]
    Records(String),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("ai generation is not available")]
    AiUnavailable,
    #[error(transparent)]
    Ai(#[from] AiError),
    #[error("ai generation timed out after {0:?}")]
    Timeout(Duration),
}

/// Content-production failure, scoped to one recipient.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{recipient_id}: {failure}")]
pub struct GenerationError {
    pub recipient_id: RecipientId,
    pub failure: GenerationFailure,
}

impl GenerationError {
    fn new(recipient_id: &RecipientId, failure: impl Into<GenerationFailure>) -> Self {
        Self {
            recipient_id: recipient_id.clone(),
            failure: failure.into(),
        }
    }
}

pub struct MessageGenerator {
    records: Arc<dyn RecordStore>,
    templates: Arc<TemplateCatalog>,
    prompts: Arc<SystemPromptCatalog>,
    ai: Option<Arc<dyn TextGenerator>>,
    ai_model: Option<String>,
    shell: EmailShell,
    generation_timeout: Duration,
    test_recipient: Option<EmailAddress>,
}

impl MessageGenerator {
    pub fn new(records: Arc<dyn RecordStore>, templates: Arc<TemplateCatalog>, shell: EmailShell) -> Self {
        Self {
            records,
            templates,
            prompts: Arc::new(SystemPromptCatalog::new()),
            ai: None,
            ai_model: None,
            shell,
            generation_timeout: Duration::from_secs(60),
            test_recipient: None,
        }
    }

    pub fn with_ai(
        mut self,
        generator: Arc<dyn TextGenerator>,
        prompts: Arc<SystemPromptCatalog>,
        default_model: Option<String>,
    ) -> Self {
        self.ai = Some(generator);
        self.prompts = prompts;
        self.ai_model = default_model;
        self
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn with_test_recipient(mut self, address: Option<EmailAddress>) -> Self {
        self.test_recipient = address;
        self
    }

    pub fn ai_available(&self) -> bool {
        self.ai.is_some()
    }

    pub fn test_recipient(&self) -> Option<&EmailAddress> {
        self.test_recipient.as_ref()
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, mode = job.generation.label()))]
    pub async fn generate(&self, recipient_id: &RecipientId, job: &Job) -> Result<Message, GenerationError> {
        let fail = |f: GenerationFailure| GenerationError::new(recipient_id, f);

        let lead = self.lead(recipient_id).map_err(fail)?;
        let actual_recipient = lead
            .email
            .clone()
            .ok_or_else(|| fail(GenerationFailure::MissingAddress))?;

        // Test mode changes only where the message goes, never how it is built.
        let to = if job.test_mode {
            job.initiator
                .email
                .as_ref()
                .or(self.test_recipient.as_ref())
                .map(|e| e.to_string())
                .ok_or_else(|| fail(GenerationFailure::NoTestAddress))?
        } else {
            actual_recipient.clone()
        };

        let content = self
            .compose(&lead, &job.generation, &job.template_ref, &job.initiator)
            .await
            .map_err(fail)?;
        let body = if job.generation.is_ai() {
            self.shell
                .wrap(&content.subject, &content.content, &job.initiator.display_name())
        } else {
            content.content
        };

        debug!(recipient = %recipient_id, %to, subject = %content.subject, "message generated");
        Ok(Message {
            recipient_id: recipient_id.clone(),
            to,
            actual_recipient,
            subject: content.subject,
            body,
            template_ref: job.template_ref.clone(),
            ai_generated: job.generation.is_ai(),
        })
    }

    /// Content for one lead without creating a job or sending anything, so a
    /// user can check tone and prompt before a bulk run. AI content comes back
    /// unwrapped; the lead needs no email address.
    #[instrument(skip(self, initiator), fields(mode = generation.label()))]
    pub async fn preview(
        &self,
        recipient_id: &RecipientId,
        generation: &GenerationMode,
        template_ref: &str,
        initiator: &Initiator,
    ) -> Result<Preview, GenerationError> {
        let fail = |f: GenerationFailure| GenerationError::new(recipient_id, f);
        let lead = self.lead(recipient_id).map_err(fail)?;
        let content = self
            .compose(&lead, generation, template_ref, initiator)
            .await
            .map_err(fail)?;
        debug!(recipient = %recipient_id, subject = %content.subject, "preview generated");
        Ok(Preview {
            recipient_id: recipient_id.clone(),
            subject: content.subject,
            content: content.content,
            model_used: content.model_used,
        })
    }

    fn lead(&self, recipient_id: &RecipientId) -> Result<LeadRecord, GenerationFailure> {
        self.records
            .get(recipient_id)
            .map_err(|e| GenerationFailure::Records(e.to_string()))?
            .ok_or(GenerationFailure::UnknownRecipient)
    }

    async fn compose(
        &self,
        lead: &LeadRecord,
        generation: &GenerationMode,
        template_ref: &str,
        initiator: &Initiator,
    ) -> Result<Composed, GenerationFailure> {
        match generation {
            GenerationMode::Template => {
                let (subject, content) = self.templates.render(template_ref, &lead.fields)?;
                Ok(Composed {
                    subject,
                    content,
                    model_used: None,
                })
            }
            GenerationMode::Ai {
                tone,
                additional_context,
            } => {
                self.generate_with_ai(lead, template_ref, initiator, tone, additional_context)
                    .await
            }
        }
    }

    async fn generate_with_ai(
        &self,
        lead: &LeadRecord,
        template_ref: &str,
        initiator: &Initiator,
        tone: &str,
        additional_context: &str,
    ) -> Result<Composed, GenerationFailure> {
        let ai = self.ai.as_ref().ok_or(GenerationFailure::AiUnavailable)?;
        let system_prompt = self.prompts.resolve(template_ref)?;

        let inputs = PromptInputs {
            tone: tone.to_string(),
            additional_context: additional_context.to_string(),
            current_user: initiator.display_name(),
        };
        let prompt = build_prompt(system_prompt, &lead.fields, &inputs);
        let model = system_prompt.model.as_deref().or(self.ai_model.as_deref());
        let request = CompletionRequest::new(model, prompt);
        let model_used = request.model.clone();

        let raw = tokio::time::timeout(self.generation_timeout, ai.complete(request))
            .await
            .map_err(|_| GenerationFailure::Timeout(self.generation_timeout))??;
        let email = parse_email_response(&raw)?;

        Ok(Composed {
            subject: email.subject,
            content: email.content,
            model_used: Some(model_used),
        })
    }
}

/// Subject and unwrapped content, before any delivery decision.
struct Composed {
    subject: String,
    content: String,
    model_used: Option<String>,
}

/// Single-lead content preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preview {
    pub recipient_id: RecipientId,
    pub subject: String,
    pub content: String,
    /// `None` for template rendering.
    pub model_used: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::{Initiator, JobRequest, RecipientSelection};
    use crate::messaging::template::EmailTemplate;
    use crate::records::InMemoryRecordStore;
    use async_trait::async_trait;
    use forgecrm_ai::AiSystemPrompt;
    use forgecrm_core::{JobId, UserId};
    use serde_json::json;

    struct CannedAi(Result<String, AiError>);

    #[async_trait]
    impl TextGenerator for CannedAi {
        async fn complete(&self, _request: CompletionRequest) -> Result<String, AiError> {
            self.0.clone()
        }
    }

    struct SlowAi;

    #[async_trait]
    impl TextGenerator for SlowAi {
        async fn complete(&self, _request: CompletionRequest) -> Result<String, AiError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(String::new())
        }
    }

    fn rid(s: &str) -> RecipientId {
        RecipientId::new(s).unwrap()
    }

    fn generator() -> MessageGenerator {
        let records = InMemoryRecordStore::from_json(json!([
            { "name": "L-1", "first_name": "Ada", "email": "ada@analytical.test" },
            { "name": "L-2", "first_name": "Nobody" },
        ]))
        .unwrap();
        let mut templates = TemplateCatalog::new();
        templates
            .insert(EmailTemplate {
                name: "welcome".to_string(),
                subject: "Welcome {{doc.first_name}}".to_string(),
                body: "<p>Hi {{doc.first_name}}</p>".to_string(),
            })
            .unwrap();
        MessageGenerator::new(Arc::new(records), Arc::new(templates), EmailShell::new("Forge CRM"))
    }

    fn job(test_mode: bool, generation: GenerationMode, initiator: Initiator) -> Job {
        let request = JobRequest {
            selection: RecipientSelection::Explicit(vec![rid("L-1")]),
            template_ref: if generation.is_ai() { "default" } else { "welcome" }.to_string(),
            test_mode,
            generation,
            initiator,
        };
        Job::queued(JobId::new(), &request, vec![rid("L-1"), rid("L-2")])
    }

    fn grace() -> Initiator {
        Initiator::new(UserId::new())
            .with_email(EmailAddress::parse("grace@forge.test").unwrap())
            .with_full_name("Grace")
    }

    fn ai_mode() -> GenerationMode {
        GenerationMode::Ai {
            tone: "friendly".to_string(),
            additional_context: String::new(),
        }
    }

    fn prompts() -> Arc<SystemPromptCatalog> {
        Arc::new([AiSystemPrompt::new("outreach", "Write to {{lead_summary_text}}").as_default()].into_iter().collect())
    }

    #[tokio::test]
    async fn template_mode_renders_for_the_true_recipient() {
        let message = generator()
            .generate(&rid("L-1"), &job(false, GenerationMode::Template, grace()))
            .await
            .unwrap();
        assert_eq!(message.to, "ada@analytical.test");
        assert_eq!(message.subject, "Welcome Ada");
        assert_eq!(message.body, "<p>Hi Ada</p>");
        assert!(!message.is_redirected());
        assert!(!message.ai_generated);
    }

    #[tokio::test]
    async fn test_mode_redirects_delivery_only() {
        let live = generator()
            .generate(&rid("L-1"), &job(false, GenerationMode::Template, grace()))
            .await
            .unwrap();
        let test = generator()
            .generate(&rid("L-1"), &job(true, GenerationMode::Template, grace()))
            .await
            .unwrap();

        assert_eq!(test.to, "grace@forge.test");
        assert_eq!(test.actual_recipient, "ada@analytical.test");
        assert_eq!((test.subject, test.body), (live.subject, live.body));
    }

    #[tokio::test]
    async fn test_mode_falls_back_to_configured_address() {
        let anonymous = Initiator::new(UserId::new());
        let err = generator()
            .generate(&rid("L-1"), &job(true, GenerationMode::Template, anonymous.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.failure, GenerationFailure::NoTestAddress);

        let message = generator()
            .with_test_recipient(Some(EmailAddress::parse("qa@forge.test").unwrap()))
            .generate(&rid("L-1"), &job(true, GenerationMode::Template, anonymous))
            .await
            .unwrap();
        assert_eq!(message.to, "qa@forge.test");
    }

    #[tokio::test]
    async fn lead_problems_are_per_recipient_errors() {
        let g = generator();
        let j = job(true, GenerationMode::Template, grace());

        let missing = g.generate(&rid("L-2"), &j).await.unwrap_err();
        assert_eq!(missing.recipient_id, rid("L-2"));
        assert_eq!(missing.failure, GenerationFailure::MissingAddress);

        let unknown = g.generate(&rid("L-9"), &j).await.unwrap_err();
        assert_eq!(unknown.failure, GenerationFailure::UnknownRecipient);
    }

    #[tokio::test]
    async fn ai_mode_wraps_generated_content() {
        let ai = Arc::new(CannedAi(Ok(r#"{"subject":"Hello Ada","content":"<p>Generated</p>"}"#.to_string())));
        let message = generator()
            .with_ai(ai, prompts(), None)
            .generate(&rid("L-1"), &job(false, ai_mode(), grace()))
            .await
            .unwrap();

        assert!(message.ai_generated);
        assert_eq!(message.subject, "Hello Ada");
        assert!(message.body.contains("<p>Generated</p>"));
        assert!(message.body.contains("<strong>Grace</strong>"));
    }

    #[tokio::test]
    async fn ai_failures_stay_per_recipient() {
        let j = job(false, ai_mode(), grace());

        let unavailable = generator().generate(&rid("L-1"), &j).await.unwrap_err();
        assert_eq!(unavailable.failure, GenerationFailure::AiUnavailable);

        let malformed = generator()
            .with_ai(Arc::new(CannedAi(Ok("not json".to_string()))), prompts(), None)
            .generate(&rid("L-1"), &j)
            .await
            .unwrap_err();
        assert!(matches!(malformed.failure, GenerationFailure::Ai(AiError::MalformedResponse(_))));

        let provider = generator()
            .with_ai(Arc::new(CannedAi(Err(AiError::InferenceFailed("502".into())))), prompts(), None)
            .generate(&rid("L-1"), &j)
            .await
            .unwrap_err();
        assert!(matches!(provider.failure, GenerationFailure::Ai(AiError::InferenceFailed(_))));
    }

    #[tokio::test]
    async fn slow_generation_times_out() {
        let err = generator()
            .with_ai(Arc::new(SlowAi), prompts(), None)
            .with_generation_timeout(Duration::from_millis(50))
            .generate(&rid("L-1"), &job(false, ai_mode(), grace()))
            .await
            .unwrap_err();
        assert_eq!(err.failure, GenerationFailure::Timeout(Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn preview_needs_no_address_and_sends_nothing() {
        let preview = generator()
            .preview(&rid("L-2"), &GenerationMode::Template, "welcome", &grace())
            .await
            .unwrap();
        assert_eq!(preview.recipient_id, rid("L-2"));
        assert_eq!(preview.subject, "Welcome Nobody");
        assert_eq!(preview.content, "<p>Hi Nobody</p>");
        assert_eq!(preview.model_used, None);

        let unknown = generator()
            .preview(&rid("L-9"), &GenerationMode::Template, "welcome", &grace())
            .await
            .unwrap_err();
        assert_eq!(unknown.failure, GenerationFailure::UnknownRecipient);
    }

    #[tokio::test]
    async fn ai_preview_returns_raw_content_and_the_model() {
        let ai = Arc::new(CannedAi(Ok(r#"{"subject":"Hello Ada","content":"<p>Generated</p>"}"#.to_string())));
        let preview = generator()
            .with_ai(ai, prompts(), Some("openai/gpt-4o-mini".to_string()))
            .preview(&rid("L-1"), &ai_mode(), "default", &grace())
            .await
            .unwrap();

        assert_eq!(preview.subject, "Hello Ada");
        assert_eq!(preview.content, "<p>Generated</p>");
        assert_eq!(preview.model_used.as_deref(), Some("openai/gpt-4o-mini"));
    }
}
