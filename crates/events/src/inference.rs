//! The inference collaborator boundary (§6). Neither the router's form
//! filler nor the agent loop own an HTTP client — both drive an
//! `InferenceClient`, and a concrete cloud/local implementation is supplied
//! by the embedder.

use async_trait::async_trait;
use thiserror::Error;

/// One message in a conversation, independent of any wire format.
#[derive(Debug, Clone)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum InferenceError {
    #[error("inference request failed: {0}")]
    RequestFailed(String),
    #[error("inference response had no usable text content")]
    EmptyResponse,
}

/// The text produced by one completion call. Token usage and other
/// metadata are the concrete client's concern, not this boundary's.
#[derive(Debug, Clone)]
pub struct InferenceResponse {
    pub text: String,
}

/// The seam between the fabric and whatever serves completions. A model
/// name of `None` means "use the implementation's default"; `Some(alias)`
/// is resolved however the implementation sees fit (model ladders,
/// provider-specific IDs, and so on).
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn complete(
        &self,
        model: Option<&str>,
        messages: Vec<Message>,
        max_tokens: u32,
        system: Option<&str>,
    ) -> Result<InferenceResponse, InferenceError>;
}
