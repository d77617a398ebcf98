//! The Envelope & Dispatch Engine (§4.1): `submit(envelope) -> Acknowledgement`
//! drives an envelope, and everything it transitively produces, through
//! structural validation, schema validation, the security check, dispatch,
//! response classification, response schema validation, and re-entry —
//! zero-trust re-entry end to end.

mod engine;
mod handler;
mod registry;
mod repair;

pub use engine::{Acknowledgement, Engine};
pub use handler::{FnHandler, Handler, HandlerContext, SubmitHandle};
pub use registry::ListenerRegistry;
pub use repair::{Repairer, WhitespaceTrimRepairer};
