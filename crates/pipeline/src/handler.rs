//! The handler interface (§6): `handle(payload, context) -> Response`.
//! Handlers see only their own incoming envelope and a scoped capability to
//! emit further envelopes — never a reference to the engine itself (§9's
//! "cyclic references" pattern).

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use conduit_events::Response;

/// One envelope a handler wants to emit outside of its terminal `Response`
/// — fire-and-forget progress, not the handler's own return value.
#[derive(Debug, Clone)]
pub struct PendingEmit {
    pub thread_id: String,
    pub payload: Vec<u8>,
    pub payload_tag: String,
}

/// Scoped emit capability, valid only for the lifetime of one handler
/// invocation. Cloning is cheap; all clones share the same backing buffer,
/// which the engine drains once the handler's `handle` call returns.
#[derive(Clone)]
pub struct SubmitHandle {
    pending: Arc<Mutex<Vec<PendingEmit>>>,
}

impl SubmitHandle {
    pub(crate) fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn emit(&self, thread_id: impl Into<String>, payload: impl Into<Vec<u8>>, payload_tag: impl Into<String>) {
        self.pending.lock().expect("submit handle mutex poisoned").push(PendingEmit {
            thread_id: thread_id.into(),
            payload: payload.into(),
            payload_tag: payload_tag.into(),
        });
    }

    pub(crate) fn drain(&self) -> Vec<PendingEmit> {
        std::mem::take(&mut *self.pending.lock().expect("submit handle mutex poisoned"))
    }
}

/// What a handler is invoked with (§6's Handler interface).
#[derive(Clone)]
pub struct HandlerContext {
    pub thread_id: String,
    pub sender: String,
    pub self_name: String,
    pub submit: SubmitHandle,
}

/// A registered capability: validate (via the shared `SchemaValidator`,
/// owned by the engine, not the handler), handle, describe (via
/// `HandlerRegistration`, also engine-owned). The handler itself is only
/// the `handle` half of that capability set (§9).
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, payload: &[u8], ctx: HandlerContext) -> Response;
}

/// A `Handler` built from a plain closure, for tests and simple stubs.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(&[u8], HandlerContext) -> Response + Send + Sync,
{
    async fn handle(&self, payload: &[u8], ctx: HandlerContext) -> Response {
        (self.0)(payload, ctx)
    }
}
