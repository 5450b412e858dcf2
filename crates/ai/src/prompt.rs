//! Prompt assembly and response parsing for AI-generated emails.
//!
//! A prompt is built in three layers:
//! 1. the system prompt's content, rendered as a handlebars template against
//!    the lead and the caller's preferences;
//! 2. a lead-details block, appended only when the rendered text does not
//!    already embed the lead JSON;
//! 3. a fixed output directive demanding a `{subject, content}` JSON object.

use handlebars::Handlebars;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::result::{AiError, GeneratedEmail};
use crate::system_prompt::AiSystemPrompt;

const EXCLUDED_PREFIXES: &[&str] = &["_", "idx", "naming_series", "image", "timeline_hash"];
const EXCLUDED_FIELDS: &[&str] = &[
    "amended_from",
    "docstatus",
    "doctype",
    "modified_by",
    "owner",
    "parent",
    "parentfield",
    "parenttype",
    "creation",
    "modified",
];

pub const JSON_OUTPUT_DIRECTIVE: &str = "\n\n--- MANDATORY OUTPUT FORMAT ---\
\nYour entire response MUST be a single, valid JSON object.\
\nThis JSON object MUST contain exactly two fields:\
\n1. \"subject\": A string for the email subject.\
\n2. \"content\": A string containing the complete email body, formatted as HTML (e.g., using <p>, <ul>, <li>, <strong> tags, etc.).\
\nExample of valid JSON output:\
\n{\n  \"subject\": \"Regarding Your Recent Inquiry About Product X\",\
\n  \"content\": \"<p>Dear User,</p><p>Thank you for your interest...</p>\"\
\n}\
\nDo NOT include any text or explanations outside of this JSON object.";

/// Caller-side preferences that shape one prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptInputs {
    pub tone: String,
    pub additional_context: String,
    /// Display name or address of the user running the job.
    pub current_user: String,
}

/// Build the final prompt for one lead.
pub fn build_prompt(
    system_prompt: &AiSystemPrompt,
    lead: &Map<String, Value>,
    inputs: &PromptInputs,
) -> String {
    let relevant = relevant_fields(lead);
    let lead_json = serde_json::to_string_pretty(&Value::Object(relevant))
        .unwrap_or_else(|_| "{}".to_string());

    let display_name = display_name(lead);
    let summary = format!(
        "Lead: {display_name}, Org: {}, Title: {}",
        field_or_na(lead, &["organization"]),
        field_or_na(lead, &["job_title"]),
    );

    let context = json!({
        "lead_summary_text": summary,
        "lead_data_json": lead_json,
        "lead": lead,
        "user_requested_tone": inputs.tone,
        "user_additional_instructions": inputs.additional_context,
        "current_user": inputs.current_user,
    });

    let mut hb = Handlebars::new();
    hb.register_escape_fn(handlebars::no_escape);

    let mut body = match hb.render_template(&system_prompt.content, &context) {
        Ok(rendered) => rendered,
        Err(e) => {
            warn!(prompt = %system_prompt.name, error = %e, "system prompt failed to render; using raw text");
            system_prompt.content.clone()
        }
    };

    if !body.contains(&lead_json) {
        body.push_str("\n\n");
        body.push_str(&lead_details_block(lead, &display_name, &lead_json));
        debug!(prompt = %system_prompt.name, "appended lead details block");
    }

    body.push_str(JSON_OUTPUT_DIRECTIVE);
    body
}

/// Parse a model answer into subject + HTML content.
///
/// Accepts a bare JSON object, optionally wrapped in a markdown code fence.
pub fn parse_email_response(raw: &str) -> Result<GeneratedEmail, AiError> {
    let text = strip_code_fence(raw.trim());

    let value: Value = serde_json::from_str(text).map_err(|e| {
        let preview: String = text.chars().take(200).collect();
        AiError::MalformedResponse(format!("invalid JSON ({e}); response was: '{preview}'"))
    })?;

    let obj = value
        .as_object()
        .ok_or_else(|| AiError::MalformedResponse("response is not a JSON object".to_string()))?;

    let subject = obj.get("subject").and_then(Value::as_str);
    let content = obj.get("content").and_then(Value::as_str);

    match (subject, content) {
        (Some(subject), Some(content)) => Ok(GeneratedEmail {
            subject: subject.to_string(),
            content: content.to_string(),
        }),
        _ => {
            let missing: Vec<&str> = [("subject", subject), ("content", content)]
                .into_iter()
                .filter(|(_, v)| v.is_none())
                .map(|(k, _)| k)
                .collect();
            Err(AiError::MalformedResponse(format!(
                "missing required field(s): {}",
                missing.join(", ")
            )))
        }
    }
}

fn relevant_fields(lead: &Map<String, Value>) -> Map<String, Value> {
    lead.iter()
        .filter(|(k, v)| {
            !v.is_null()
                && !EXCLUDED_PREFIXES.iter().any(|p| k.starts_with(p))
                && !EXCLUDED_FIELDS.contains(&k.as_str())
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn display_name(lead: &Map<String, Value>) -> String {
    let first = lead.get("first_name").and_then(Value::as_str).unwrap_or("");
    let last = lead.get("last_name").and_then(Value::as_str).unwrap_or("");
    let full = format!("{first} {last}").trim().to_string();
    if !full.is_empty() {
        return full;
    }
    lead.get("name")
        .and_then(Value::as_str)
        .unwrap_or("Valued Contact")
        .to_string()
}

fn field_or_na(lead: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|k| lead.get(*k))
        .find_map(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| "N/A".to_string())
}

fn lead_details_block(lead: &Map<String, Value>, display_name: &str, lead_json: &str) -> String {
    [
        "--- Lead Information ---".to_string(),
        format!("Name: {display_name}"),
        format!("Email: {}", field_or_na(lead, &["email_id", "email"])),
        format!("Organization: {}", field_or_na(lead, &["organization"])),
        format!("Job Title: {}", field_or_na(lead, &["job_title"])),
        format!("Industry: {}", field_or_na(lead, &["industry"])),
        "\nFull Lead Data (JSON format for AI reference if needed):".to_string(),
        lead_json.to_string(),
    ]
    .join("\n")
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
