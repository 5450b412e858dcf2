//! Named AI system prompts ("master instructions") with a single default.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::result::AiError;

/// Master instructions for AI email generation.
///
/// `content` is a handlebars template; see [`crate::prompt::build_prompt`] for
/// the variables it can use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiSystemPrompt {
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

impl AiSystemPrompt {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            model: None,
            is_default: false,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }
}

/// Prompt catalog. At most one prompt is the default at any time: inserting
/// a default prompt clears the flag on every other prompt.
#[derive(Debug, Clone, Default)]
pub struct SystemPromptCatalog {
    prompts: BTreeMap<String, AiSystemPrompt>,
}

impl SystemPromptCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, prompt: AiSystemPrompt) {
        if prompt.is_default {
            for other in self.prompts.values_mut() {
                other.is_default = false;
            }
        }
        self.prompts.insert(prompt.name.clone(), prompt);
    }

    pub fn get(&self, name: &str) -> Option<&AiSystemPrompt> {
        self.prompts.get(name)
    }

    pub fn default_prompt(&self) -> Option<&AiSystemPrompt> {
        self.prompts.values().find(|p| p.is_default)
    }

    /// Resolve a prompt reference: blank or `"default"` selects the default.
    ///
    /// Fails when nothing matches or the matched prompt has no content.
    pub fn resolve(&self, reference: &str) -> Result<&AiSystemPrompt, AiError> {
        let reference = reference.trim();
        let prompt = if reference.is_empty() || reference.eq_ignore_ascii_case("default") {
            self.default_prompt()
                .ok_or_else(|| AiError::NotConfigured("no default AI system prompt".to_string()))?
        } else {
            self.get(reference).ok_or_else(|| {
                AiError::NotConfigured(format!("AI system prompt not found: {reference}"))
            })?
        };

        if prompt.content.trim().is_empty() {
            return Err(AiError::NotConfigured(format!(
                "AI system prompt '{}' has empty content",
                prompt.name
            )));
        }

        Ok(prompt)
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

impl FromIterator<AiSystemPrompt> for SystemPromptCatalog {
    fn from_iter<I: IntoIterator<Item = AiSystemPrompt>>(iter: I) -> Self {
        let mut catalog = Self::new();
        for prompt in iter {
            catalog.insert(prompt);
        }
        catalog
    }
}
