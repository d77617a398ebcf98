//! Form filling — turning a natural-language request into payload bytes
//! rooted at a chosen listener's request schema (§4.7, fill step).
//!
//! The filler is a collaborator seam: `FormFillStrategy` is implemented by
//! anything that can turn (schema_ref, description, text) into XML. The
//! only implementation shipped here drives the shared `InferenceClient`,
//! never a concrete HTTP client.

use async_trait::async_trait;
use conduit_events::{InferenceClient, Message};

/// Model ladder: two attempts on the cheap model, one escalation. The
/// thinker model is never used here — this is mechanical form filling, not
/// reasoning.
const MODEL_LADDER: &[&str] = &["haiku", "haiku", "sonnet"];

#[derive(Debug, Clone)]
pub enum FormFillResult {
    Success { xml: String },
    Failed { reason: String },
}

#[async_trait]
pub trait FormFillStrategy: Send + Sync {
    /// `schema_ref` is the expected XML root tag; `description` is the
    /// handler's registered description, given as context; `request_text`
    /// is the natural-language request being translated.
    async fn fill(&self, schema_ref: &str, description: &str, request_text: &str) -> FormFillResult;
}

/// Drives an `InferenceClient` up the model ladder, retrying with an
/// increasingly explicit prompt when the previous attempt didn't produce
/// valid XML for the target tag.
pub struct CloudFormFiller {
    client: std::sync::Arc<dyn InferenceClient>,
}

impl CloudFormFiller {
    pub fn new(client: std::sync::Arc<dyn InferenceClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FormFillStrategy for CloudFormFiller {
    async fn fill(&self, schema_ref: &str, description: &str, request_text: &str) -> FormFillResult {
        let mut last_error = String::new();

        for (attempt, model) in MODEL_LADDER.iter().enumerate() {
            let prompt = if attempt == 0 {
                build_fill_prompt(schema_ref, description, request_text)
            } else {
                build_retry_prompt(schema_ref, description, request_text, &last_error)
            };

            let response = match self
                .client
                .complete(Some(model), vec![Message::user(prompt)], 1024, None)
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };

            let candidate = strip_xml_fencing(&response.text);
            match validate_xml(&candidate, schema_ref) {
                Ok(()) => return FormFillResult::Success { xml: candidate },
                Err(reason) => last_error = reason,
            }
        }

        FormFillResult::Failed { reason: last_error }
    }
}

fn build_fill_prompt(schema_ref: &str, description: &str, request_text: &str) -> String {
    format!(
        "You translate natural-language requests into XML payloads for a \
         message dispatch fabric. Produce only the XML, no commentary, no \
         code fencing.\n\n\
         Target root tag: <{schema_ref}>\n\
         Handler description: {description}\n\n\
         Request: {request_text}"
    )
}

fn build_retry_prompt(schema_ref: &str, description: &str, request_text: &str, last_error: &str) -> String {
    format!(
        "Your previous attempt was rejected: {last_error}\n\n\
         Produce only valid XML rooted at <{schema_ref}>, no commentary, no \
         code fencing.\n\n\
         Target root tag: <{schema_ref}>\n\
         Handler description: {description}\n\n\
         Request: {request_text}"
    )
}

/// Strips ```xml fences a model sometimes wraps its output in, despite
/// being told not to.
fn strip_xml_fencing(text: &str) -> String {
    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_prefix("```xml")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim().to_string()
}

/// Cheap structural check — real root tag, balanced close — without
/// pulling in a full XML parser just to validate form-filler output. The
/// dispatch pipeline's own schema validator is the authority; this exists
/// to decide whether to retry.
fn validate_xml(candidate: &str, expected_tag: &str) -> Result<(), String> {
    let open_tag = format!("<{expected_tag}");
    if !candidate.starts_with(&open_tag) {
        return Err(format!(
            "expected root tag <{expected_tag}>, got: {}",
            candidate.chars().take(40).collect::<String>()
        ));
    }
    let self_closed = candidate.trim_end().ends_with("/>");
    let close_tag = format!("</{expected_tag}>");
    if !self_closed && !candidate.trim_end().ends_with(&close_tag) {
        return Err(format!("unclosed root tag <{expected_tag}>"));
    }
    Ok(())
}
