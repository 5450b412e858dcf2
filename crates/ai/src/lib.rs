//! `forgecrm-ai`
//!
//! **Responsibility:** optional text-generation boundary for email content.
//!
//! - It does not know about jobs, stores or delivery.
//! - It turns a lead snapshot + a system prompt into a prompt, calls a
//!   `TextGenerator`, and parses the `{subject, content}` answer.
//! - Timeouts and per-recipient failure accounting belong to the caller.

pub mod generator;
pub mod openai;
pub mod prompt;
pub mod result;
pub mod system_prompt;

pub use generator::{CompletionRequest, TextGenerator};
pub use openai::{ChatCompletionsClient, ChatCompletionsConfig};
pub use prompt::{PromptInputs, build_prompt, parse_email_response};
pub use result::{AiError, GeneratedEmail};
pub use system_prompt::{AiSystemPrompt, SystemPromptCatalog};
