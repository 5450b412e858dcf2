use async_trait::async_trait;

use crate::result::AiError;

/// Default model when neither the system prompt nor the config names one.
pub const DEFAULT_MODEL: &str = "openai/gpt-4o";

/// Instruction sent as the system message of every completion.
pub const SYSTEM_INSTRUCTION: &str = "You are an AI assistant. Follow the user's instructions carefully and precisely, especially regarding output format.";

/// One completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the provider to constrain output to a JSON object.
    pub json_response: bool,
}

impl CompletionRequest {
    pub fn new(model: Option<&str>, prompt: impl Into<String>) -> Self {
        let model = model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_MODEL);

        Self {
            model: model.to_string(),
            system: SYSTEM_INSTRUCTION.to_string(),
            prompt: prompt.into(),
            temperature: 0.7,
            max_tokens: 2048,
            json_response: true,
        }
    }
}

/// External text-generation capability.
///
/// Implementations perform exactly one remote call and return the raw text.
/// They must not retry on their own; bounding latency is the caller's job.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, AiError>;
}

#[async_trait]
impl<T> TextGenerator for std::sync::Arc<T>
where
    T: TextGenerator + ?Sized,
{
    async fn complete(&self, request: CompletionRequest) -> Result<String, AiError> {
        (**self).complete(request).await
    }
}
