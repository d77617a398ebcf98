//! Shared wire types for the dispatch fabric.
//!
//! Everything that crosses a handler boundary — the envelope, the handler's
//! response, the registration a handler is frozen with at startup, the error
//! taxonomy — lives here so that `conduit-pipeline`, `conduit-security`, and
//! `conduit-router` agree on one vocabulary without depending on each other.

pub mod envelope;
pub mod error;
pub mod inference;
pub mod registration;
pub mod response;
pub mod schema;

pub use envelope::{is_well_formed_thread_id, Envelope};
pub use error::{DispatchError, DispatchResult};
pub use inference::{InferenceClient, InferenceError, InferenceResponse, Message};
pub use registration::HandlerRegistration;
pub use response::{Output, Response};
pub use schema::{SchemaValidator, Violation, XmlTagSchemaValidator};
