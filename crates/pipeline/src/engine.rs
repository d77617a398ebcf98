//! The Envelope & Dispatch Engine (§4.1): one entry point, `submit`, that
//! drives an envelope and everything it transitively produces through the
//! seven-stage pipeline to quiescence.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use conduit_events::{is_well_formed_thread_id, DispatchError, Envelope, Response, SchemaValidator};
use conduit_kernel::Kernel;
use conduit_security::SecurityResolver;
use tokio::sync::Mutex as AsyncMutex;

use crate::handler::HandlerContext;
use crate::registry::ListenerRegistry;
use crate::repair::Repairer;

/// What `submit` returns once the root envelope and every envelope it
/// transitively produced have drained to a terminal disposition.
#[derive(Debug, Clone)]
pub struct Acknowledgement {
    pub thread_id: String,
    pub envelopes_processed: usize,
}

/// A direct delivery to a specific handler, bypassing tag-based routing —
/// used only for the two engine-synthesized notifications (§4.1 stage 5's
/// Silence→Ack and the sender-facing error after a stage 1–4 or stage 6
/// failure on a re-entered envelope). Never produced by ordinary dispatch.
struct Notification {
    target: String,
    payload: Vec<u8>,
    thread_id: String,
    origin: Envelope,
}

pub struct Engine {
    kernel: Arc<AsyncMutex<Kernel>>,
    security: Arc<SecurityResolver>,
    registry: Arc<ListenerRegistry>,
    validator: Arc<dyn SchemaValidator>,
    repairer: Option<Arc<dyn Repairer>>,
    thread_locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    max_payload_bytes: usize,
    deadline: Duration,
    message_seq: AtomicU64,
}

impl Engine {
    pub fn new(
        kernel: Arc<AsyncMutex<Kernel>>,
        security: Arc<SecurityResolver>,
        registry: Arc<ListenerRegistry>,
        validator: Arc<dyn SchemaValidator>,
    ) -> Self {
        Self {
            kernel,
            security,
            registry,
            validator,
            repairer: None,
            thread_locks: StdMutex::new(HashMap::new()),
            max_payload_bytes: 1024 * 1024,
            deadline: Duration::from_secs(30),
            message_seq: AtomicU64::new(0),
        }
    }

    pub fn with_repairer(mut self, repairer: Arc<dyn Repairer>) -> Self {
        self.repairer = Some(repairer);
        self
    }

    pub fn with_max_payload_bytes(mut self, max: usize) -> Self {
        self.max_payload_bytes = max;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    async fn thread_lock(&self, thread_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.thread_locks.lock().expect("thread lock map poisoned");
        locks
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn next_message_id(&self) -> String {
        format!("m{}", self.message_seq.fetch_add(1, Ordering::Relaxed))
    }

    fn now_epoch_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Submit the root envelope. Drives it, and every envelope it
    /// transitively produces, through the seven stages to quiescence.
    pub async fn submit(&self, root: Envelope) -> Result<Acknowledgement, DispatchError> {
        let thread_id = root.thread_id().to_string();
        let mut dispatch_queue: VecDeque<Envelope> = VecDeque::from([root]);
        let mut notify_queue: VecDeque<Notification> = VecDeque::new();
        let mut processed = 0usize;
        let mut is_first_pop = true;

        loop {
            if let Some(env) = dispatch_queue.pop_front() {
                let is_root = is_first_pop;
                is_first_pop = false;
                match self
                    .process_envelope(&env, &mut dispatch_queue, &mut notify_queue)
                    .await
                {
                    Ok(()) => processed += 1,
                    Err(err) if is_root => return Err(err),
                    Err(_) => processed += 1,
                }
                continue;
            }
            if let Some(note) = notify_queue.pop_front() {
                self.deliver_notification(note, &mut dispatch_queue, &mut notify_queue)
                    .await;
                continue;
            }
            break;
        }

        Ok(Acknowledgement {
            thread_id,
            envelopes_processed: processed,
        })
    }

    /// Stages 1–5 for one envelope already popped off the dispatch queue.
    /// On a stage 1–4 failure, attempts to notify `env.sender()` (if it has
    /// a registered handler) rather than letting the failure vanish
    /// silently; the caller treats the Err it returns as fatal only when
    /// this was the root envelope.
    async fn process_envelope(
        &self,
        env: &Envelope,
        dispatch_queue: &mut VecDeque<Envelope>,
        notify_queue: &mut VecDeque<Notification>,
    ) -> Result<(), DispatchError> {
        if let Err(err) = self.validate_structure(env) {
            return self.fail_stage(env, err, notify_queue);
        }

        if env.payload().len() > self.max_payload_bytes {
            let err = DispatchError::PayloadTooLarge {
                size: env.payload().len(),
                max: self.max_payload_bytes,
            };
            return self.fail_stage(env, err, notify_queue);
        }

        {
            let kernel = self.kernel.lock().await;
            if !kernel.threads().contains(env.thread_id()) {
                let err = DispatchError::UnknownThread {
                    thread_id: env.thread_id().to_string(),
                };
                drop(kernel);
                return self.fail_stage(env, err, notify_queue);
            }
        }

        // Stage 2: payload schema validation. The wire convention is that
        // the schema handle for a request is its own payload_tag.
        let validated_payload = match self.validate_with_repair(env.payload_tag(), env.payload()) {
            Ok(bytes) => bytes,
            Err(violation) => {
                let err = DispatchError::SchemaViolation {
                    path: violation.path,
                    reason: violation.reason,
                };
                return self.fail_stage(env, err, notify_queue);
            }
        };

        // Stage 3: security check.
        let handler_name = match self.security.resolve(env.profile(), env.payload_tag()) {
            Ok(Some(name)) => name.to_string(),
            Ok(None) => {
                tracing::warn!(
                    audit = true,
                    profile = %env.profile(),
                    tag = %env.payload_tag(),
                    "route not found; structural denial"
                );
                let err = DispatchError::RouteNotFound {
                    profile: env.profile().to_string(),
                    tag: env.payload_tag().to_string(),
                };
                return self.fail_stage(env, err, notify_queue);
            }
            Err(err) => return self.fail_stage(env, err, notify_queue),
        };

        let handler = match self.registry.get(&handler_name) {
            Some(h) => h,
            None => {
                let err = DispatchError::Configuration {
                    reason: format!("handler '{handler_name}' has no registered implementation"),
                };
                return self.fail_stage(env, err, notify_queue);
            }
        };

        let registration = self.security.registration(&handler_name).cloned();
        let spawns_thread = registration.as_ref().map(|r| r.spawns_thread).unwrap_or(false);

        let lock = self.thread_lock(env.thread_id()).await;
        let _guard = lock.lock().await;

        let execution_thread_id = if spawns_thread {
            let parent = env.thread_id().to_string();
            let profile = env.profile().to_string();
            let security = Arc::clone(&self.security);
            let sanitized: String = handler_name
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
                .collect();
            let segment = format!("{sanitized}-{}", self.message_seq.fetch_add(1, Ordering::Relaxed));
            let mut kernel = self.kernel.lock().await;
            let spawned = kernel.spawn_thread(
                &parent,
                &segment,
                &profile,
                |child, parent_profile| security.permits_spawn(parent_profile, child).unwrap_or(false),
                None,
            );
            drop(kernel);
            match spawned {
                Ok(id) => id,
                Err(e) => {
                    let err: DispatchError = e.into();
                    return self.fail_stage(env, err, notify_queue);
                }
            }
        } else {
            env.thread_id().to_string()
        };

        let retention = self.security.retention(env.profile())?;
        let message_id = self.next_message_id();
        {
            let mut kernel = self.kernel.lock().await;
            let _ = kernel.dispatch_message(
                &message_id,
                env.sender(),
                &handler_name,
                env.payload_tag(),
                &validated_payload,
                retention,
                Self::now_epoch_secs(),
            );
        }

        let ctx = HandlerContext {
            thread_id: execution_thread_id.clone(),
            sender: env.sender().to_string(),
            self_name: handler_name.clone(),
            submit: crate::handler::SubmitHandle::new(),
        };

        let response = match tokio::time::timeout(self.deadline, handler.handle(&validated_payload, ctx.clone())).await {
            Ok(response) => response,
            Err(_) => {
                let err = DispatchError::Timeout {
                    thread_id: execution_thread_id.clone(),
                };
                return self.fail_stage(env, err, notify_queue);
            }
        };

        {
            let mut kernel = self.kernel.lock().await;
            let _ = kernel.mark_delivered(
                &message_id,
                &handler_name,
                env.payload_tag(),
                &validated_payload,
                Self::now_epoch_secs(),
            );
        }

        for pending in ctx.submit.drain() {
            self.classify_output(
                &handler_name,
                &pending.payload_tag,
                &pending.thread_id,
                pending.payload,
                env,
                dispatch_queue,
                notify_queue,
            );
        }

        self.classify_response(&handler_name, &execution_thread_id, response, env, dispatch_queue, notify_queue);

        Ok(())
    }

    fn validate_structure(&self, env: &Envelope) -> Result<(), DispatchError> {
        if env.namespace().is_empty() {
            return Err(DispatchError::MalformedEnvelope {
                reason: "namespace is empty".to_string(),
            });
        }
        if env.payload_tag().is_empty() {
            return Err(DispatchError::MalformedEnvelope {
                reason: "payload_tag is empty".to_string(),
            });
        }
        if env.sender().is_empty() {
            return Err(DispatchError::MalformedEnvelope {
                reason: "sender is empty".to_string(),
            });
        }
        if env.profile().is_empty() {
            return Err(DispatchError::MalformedEnvelope {
                reason: "profile is empty".to_string(),
            });
        }
        if !is_well_formed_thread_id(env.thread_id()) {
            return Err(DispatchError::MalformedEnvelope {
                reason: format!("thread_id '{}' is not well-formed", env.thread_id()),
            });
        }
        Ok(())
    }

    fn validate_with_repair(&self, schema_ref: &str, payload: &[u8]) -> Result<Vec<u8>, conduit_events::Violation> {
        match self.validator.validate(schema_ref, payload) {
            Ok(()) => Ok(payload.to_vec()),
            Err(violation) => {
                if let Some(repairer) = &self.repairer {
                    if let Some(repaired) = repairer.repair(schema_ref, payload) {
                        if self.validator.validate(schema_ref, &repaired).is_ok() {
                            return Ok(repaired);
                        }
                    }
                }
                Err(violation)
            }
        }
    }

    fn fail_stage(
        &self,
        env: &Envelope,
        err: DispatchError,
        notify_queue: &mut VecDeque<Notification>,
    ) -> Result<(), DispatchError> {
        if self.registry.get(env.sender()).is_some() {
            notify_queue.push_back(Notification {
                target: env.sender().to_string(),
                payload: error_payload(&err),
                thread_id: env.thread_id().to_string(),
                origin: env.clone(),
            });
            Ok(())
        } else {
            Err(err)
        }
    }

    fn classify_response(
        &self,
        producing_handler: &str,
        execution_thread_id: &str,
        response: Response,
        source_env: &Envelope,
        dispatch_queue: &mut VecDeque<Envelope>,
        notify_queue: &mut VecDeque<Notification>,
    ) {
        match response {
            Response::Reply { payload, payload_tag } => {
                self.classify_output(
                    producing_handler,
                    &payload_tag,
                    execution_thread_id,
                    payload,
                    source_env,
                    dispatch_queue,
                    notify_queue,
                );
            }
            Response::Send { target, payload, payload_tag } => {
                self.classify_output(
                    producing_handler,
                    &payload_tag,
                    &target,
                    payload,
                    source_env,
                    dispatch_queue,
                    notify_queue,
                );
            }
            Response::Broadcast(outputs) => {
                for output in outputs {
                    self.classify_output(
                        producing_handler,
                        &output.payload_tag,
                        &output.target,
                        output.payload,
                        source_env,
                        dispatch_queue,
                        notify_queue,
                    );
                }
            }
            Response::Silence => {
                if self.registry.get(source_env.sender()).is_some() {
                    notify_queue.push_back(Notification {
                        target: source_env.sender().to_string(),
                        payload: b"<Ack/>".to_vec(),
                        thread_id: execution_thread_id.to_string(),
                        origin: source_env.clone(),
                    });
                }
            }
            Response::Error { kind, message } => {
                tracing::warn!(handler = %producing_handler, kind = %kind, "handler returned Error response");
                if self.registry.get(source_env.sender()).is_some() {
                    notify_queue.push_back(Notification {
                        target: source_env.sender().to_string(),
                        payload: format!(r#"{{"kind":"{kind}","message":"{message}"}}"#).into_bytes(),
                        thread_id: execution_thread_id.to_string(),
                        origin: source_env.clone(),
                    });
                }
            }
        }
    }

    /// Stage 6 (response schema validation) and stage 7 (re-entry) for one
    /// output. This is the enforcement point of zero-trust re-entry: bytes
    /// a handler hands back are validated against *that handler's own*
    /// declared response schema before a new envelope is ever built from
    /// them.
    fn classify_output(
        &self,
        producing_handler: &str,
        tag: &str,
        target_thread_id: &str,
        payload: Vec<u8>,
        source_env: &Envelope,
        dispatch_queue: &mut VecDeque<Envelope>,
        notify_queue: &mut VecDeque<Notification>,
    ) {
        let schema_ref = self
            .security
            .registration(producing_handler)
            .and_then(|r| r.response_schema.clone())
            .unwrap_or_else(|| tag.to_string());

        match self.validator.validate(&schema_ref, &payload) {
            Ok(()) => {
                let new_env = source_env.re_enter(producing_handler, target_thread_id, tag, payload);
                dispatch_queue.push_back(new_env);
            }
            Err(violation) => {
                tracing::warn!(
                    audit = true,
                    handler = %producing_handler,
                    reason = %violation.reason,
                    "response schema violation; output discarded"
                );
                if self.registry.get(source_env.sender()).is_some() {
                    let err = DispatchError::ResponseSchemaViolation {
                        handler: producing_handler.to_string(),
                        reason: violation.reason,
                    };
                    notify_queue.push_back(Notification {
                        target: source_env.sender().to_string(),
                        payload: error_payload(&err),
                        thread_id: source_env.thread_id().to_string(),
                        origin: source_env.clone(),
                    });
                }
            }
        }
    }

    /// Direct delivery to `note.target`, bypassing tag routing. Used only
    /// for the engine's own Ack/error notifications.
    async fn deliver_notification(
        &self,
        note: Notification,
        dispatch_queue: &mut VecDeque<Envelope>,
        notify_queue: &mut VecDeque<Notification>,
    ) {
        let Some(handler) = self.registry.get(&note.target) else {
            return;
        };
        let ctx = HandlerContext {
            thread_id: note.thread_id.clone(),
            sender: "__engine__".to_string(),
            self_name: note.target.clone(),
            submit: crate::handler::SubmitHandle::new(),
        };
        let response = handler.handle(&note.payload, ctx.clone()).await;

        for pending in ctx.submit.drain() {
            self.classify_output(
                &note.target,
                &pending.payload_tag,
                &pending.thread_id,
                pending.payload,
                &note.origin,
                dispatch_queue,
                notify_queue,
            );
        }

        match response {
            Response::Reply { .. } | Response::Send { .. } | Response::Broadcast(_) => {
                self.classify_response(&note.target, &note.thread_id, response, &note.origin, dispatch_queue, notify_queue);
            }
            Response::Silence | Response::Error { .. } => {}
        }
    }
}

fn error_payload(err: &DispatchError) -> Vec<u8> {
    format!(r#"{{"kind":"{}","message":"{}"}}"#, err.kind(), err).into_bytes()
}
