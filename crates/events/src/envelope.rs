//! The envelope — the atomic unit of the dispatch fabric.
//!
//! Immutable after construction. Payload bytes are never inspected by any
//! core component except the handler that owns the tag and the schema
//! validator registered for that tag.

use serde::{Deserialize, Serialize};

/// An immutable message envelope.
///
/// Construct via [`Envelope::new`]; there is no public way to mutate a field
/// afterward. Re-entry (§4.1 stage 7) always builds a *new* envelope rather
/// than mutating the one that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    namespace: String,
    payload_tag: String,
    payload: Vec<u8>,
    sender: String,
    thread_id: String,
    profile: String,
}

impl Envelope {
    /// Build a new envelope. All fields are fixed from this point on.
    pub fn new(
        namespace: impl Into<String>,
        payload_tag: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        sender: impl Into<String>,
        thread_id: impl Into<String>,
        profile: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            payload_tag: payload_tag.into(),
            payload: payload.into(),
            sender: sender.into(),
            thread_id: thread_id.into(),
            profile: profile.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn payload_tag(&self) -> &str {
        &self.payload_tag
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Build the envelope that re-enters the engine after a handler output
    /// has passed response-schema validation (§4.1 stage 7).
    ///
    /// `sender` becomes the producing handler's name; `profile` is always
    /// inherited, never widened; `thread_id` is either inherited or the
    /// freshly spawned child thread, per the caller's decision.
    pub fn re_enter(
        &self,
        producing_handler: &str,
        thread_id: impl Into<String>,
        payload_tag: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            namespace: self.namespace.clone(),
            payload_tag: payload_tag.into(),
            payload: payload.into(),
            sender: producing_handler.to_string(),
            thread_id: thread_id.into(),
            profile: self.profile.clone(),
        }
    }
}

/// Thread-ID wire format validation (§6): dot-separated components, each
/// matching `[A-Za-z0-9_-]+`, root component literally `root`.
pub fn is_well_formed_thread_id(thread_id: &str) -> bool {
    let mut parts = thread_id.split('.');
    match parts.next() {
        Some("root") => {}
        _ => return false,
    }
    parts.all(|component| {
        !component.is_empty()
            && component
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    })
}
