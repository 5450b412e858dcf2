//! Static email templates and the content seed file.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use handlebars::Handlebars;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use forgecrm_ai::{AiSystemPrompt, SystemPromptCatalog};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EmailTemplate {
    pub name: String,
    pub subject: String,
    /// HTML body; `{{doc.field}}` values are HTML-escaped.
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("email template not found: {0}")]
    NotFound(String),
    #[error("email template '{name}' is invalid: {reason}")]
    Invalid { name: String, reason: String },
    #[error("rendering email template '{name}' failed: {reason}")]
    Render { name: String, reason: String },
}

/// Named templates compiled up front. Subjects render without HTML escaping,
/// bodies with it.
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    subjects: Handlebars<'static>,
    bodies: Handlebars<'static>,
    names: BTreeMap<String, EmailTemplate>,
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        let mut subjects = Handlebars::new();
        subjects.register_escape_fn(handlebars::no_escape);
        Self {
            subjects,
            bodies: Handlebars::new(),
            names: BTreeMap::new(),
        }
    }
}

impl TemplateCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, template: EmailTemplate) -> Result<(), TemplateError> {
        let invalid = |e: handlebars::TemplateError| TemplateError::Invalid {
            name: template.name.clone(),
            reason: e.to_string(),
        };
        self.subjects
            .register_template_string(&template.name, &template.subject)
            .map_err(invalid)?;
        self.bodies
            .register_template_string(&template.name, &template.body)
            .map_err(invalid)?;
        self.names.insert(template.name.clone(), template);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(String::as_str)
    }

    /// Render `(subject, body)` for one lead. Unknown fields render empty.
    pub fn render(&self, name: &str, doc: &Map<String, Value>) -> Result<(String, String), TemplateError> {
        if !self.contains(name) {
            return Err(TemplateError::NotFound(name.to_string()));
        }
        let context = json!({ "doc": doc });
        let render_err = |e: handlebars::RenderError| TemplateError::Render {
            name: name.to_string(),
            reason: e.to_string(),
        };
        let subject = self.subjects.render(name, &context).map_err(render_err)?;
        let body = self.bodies.render(name, &context).map_err(render_err)?;
        Ok((subject.trim().to_string(), body))
    }
}

/// Content seed file: email templates plus AI system prompts.
#[derive(Debug, Default, Deserialize)]
pub struct ContentSeed {
    #[serde(default)]
    pub email_templates: Vec<EmailTemplate>,
    #[serde(default)]
    pub ai_system_prompts: Vec<AiSystemPrompt>,
}

impl ContentSeed {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading content seed {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing content seed {}", path.display()))
    }

    pub fn into_catalogs(self) -> Result<(TemplateCatalog, SystemPromptCatalog), TemplateError> {
        let mut templates = TemplateCatalog::new();
        for template in self.email_templates {
            templates.insert(template)?;
        }
        let prompts = self.ai_system_prompts.into_iter().collect();
        Ok((templates, prompts))
    }
}
