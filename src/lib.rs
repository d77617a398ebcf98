//! `conduit` — the facade wiring the fabric's crates into one pipeline
//! instance.
//!
//! Everything here is composition: the kernel (`conduit-kernel`), the
//! security resolver (`conduit-security`), the dispatch engine
//! (`conduit-pipeline`), the semantic router (`conduit-router`), and the
//! agent loop (`conduit-agent`) are each independently usable; this crate's
//! only job is building one coherent value from an [`Organism`] plus a set
//! of handler registrations.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

pub use conduit_agent::{AgentHandler, TranslateError};
pub use conduit_config::{compose_prompt, parse_organism, ConfigError, Organism};
pub use conduit_events::{DispatchError, DispatchResult, Envelope, InferenceClient, Response, SchemaValidator};
pub use conduit_kernel::{Kernel, KernelError};
pub use conduit_pipeline::{Acknowledgement, Engine, FnHandler, Handler, HandlerContext, ListenerRegistry, Repairer};
pub use conduit_router::{DispatchPlan, EmbeddingProvider, FormFillStrategy, RouteOutcome, SemanticRouter, TfIdfProvider};
pub use conduit_security::SecurityResolver;

/// A running pipeline instance: one kernel data directory, one organism
/// generation, one set of registered handlers. Construct via
/// [`PipelineBuilder`].
pub struct Pipeline {
    engine: Engine,
    security: Arc<SecurityResolver>,
    organism: Organism,
    kernel: Arc<AsyncMutex<Kernel>>,
    router: Option<SemanticRouter>,
}

impl Pipeline {
    /// Create the root thread under the organism's configured
    /// `root_profile`, if it does not already exist (idempotent across
    /// restarts against the same data directory).
    pub async fn initialize_root(&self) -> DispatchResult<()> {
        let mut kernel = self.kernel.lock().await;
        kernel
            .initialize_root(&self.organism.root_profile)
            .map_err(DispatchError::from)
    }

    /// Submit an envelope by tag, driving it through the seven stages and
    /// everything it transitively produces (§4.1).
    pub async fn submit(&self, envelope: Envelope) -> DispatchResult<Acknowledgement> {
        self.engine.submit(envelope).await
    }

    /// Resolve a dispatch plan for a natural-language request under
    /// `profile` via rank → mask → select → fill (§4.7), then submit it as
    /// an ordinary envelope. The router never bypasses the engine's own
    /// schema and security stages — the plan's bytes still pass stage 2 and
    /// stage 3 like any other submission.
    pub async fn dispatch_by_intent(
        &self,
        request_text: &str,
        sender: &str,
        thread_id: &str,
        profile: &str,
    ) -> DispatchResult<Acknowledgement> {
        let router = self.router.as_ref().ok_or(DispatchError::NoCapability)?;
        match router.route(request_text, profile, &self.security).await? {
            RouteOutcome::Dispatched(plan) => {
                let envelope = Envelope::new(
                    "conduit.router",
                    plan.payload_tag,
                    plan.payload,
                    sender,
                    thread_id,
                    profile,
                );
                self.submit(envelope).await
            }
            RouteOutcome::NoMatch => Err(DispatchError::NoCapability),
            RouteOutcome::AllCandidatesFailed { attempts } => Err(DispatchError::FormFillFailed {
                handler: attempts
                    .first()
                    .map(|(name, _)| name.clone())
                    .unwrap_or_default(),
                reason: attempts
                    .into_iter()
                    .map(|(name, reason)| format!("{name}: {reason}"))
                    .collect::<Vec<_>>()
                    .join("; "),
            }),
        }
    }

    pub fn organism(&self) -> &Organism {
        &self.organism
    }

    pub fn security(&self) -> &SecurityResolver {
        &self.security
    }

    pub fn kernel(&self) -> Arc<AsyncMutex<Kernel>> {
        Arc::clone(&self.kernel)
    }

    /// Checkpoint the kernel — snapshot in-memory state, truncate the WAL.
    /// Safe to call at any quiet point; see `Kernel::checkpoint`.
    pub async fn checkpoint(&self) -> DispatchResult<()> {
        let mut kernel = self.kernel.lock().await;
        kernel.checkpoint().map_err(DispatchError::from)
    }
}

/// Builds a [`Pipeline`] from an [`Organism`] and a data directory,
/// registering handler implementations against the organism's listener
/// names before the engine itself is constructed — the registry must be
/// frozen before the engine can read it, so registration happens
/// builder-side.
pub struct PipelineBuilder {
    organism: Organism,
    data_dir: std::path::PathBuf,
    registry: ListenerRegistry,
    validator: Arc<dyn SchemaValidator>,
    repairer: Option<Arc<dyn Repairer>>,
    max_payload_bytes: usize,
    deadline: std::time::Duration,
    router: Option<SemanticRouter>,
}

impl PipelineBuilder {
    pub fn new(organism: Organism, data_dir: impl AsRef<Path>) -> Self {
        Self {
            organism,
            data_dir: data_dir.as_ref().to_path_buf(),
            registry: ListenerRegistry::new(),
            validator: Arc::new(conduit_events::XmlTagSchemaValidator),
            repairer: None,
            max_payload_bytes: 1024 * 1024,
            deadline: std::time::Duration::from_secs(30),
            router: None,
        }
    }

    /// Register a handler implementation for a listener already declared in
    /// the organism. Registering a name the organism does not declare is a
    /// startup configuration error, not a runtime one.
    pub fn register(mut self, listener_name: &str, handler: Arc<dyn Handler>) -> Result<Self, ConfigError> {
        self.organism
            .get_listener(listener_name)
            .ok_or_else(|| ConfigError::UnknownListener {
                profile: "<builder>".to_string(),
                listener: listener_name.to_string(),
            })?;
        self.registry.register(listener_name, handler);
        Ok(self)
    }

    /// Build and register an [`AgentHandler`] for every listener the
    /// organism declares `agent:` configuration for, composing its system
    /// prompt from the organism's named prompt blocks (§6).
    pub fn with_agents(
        mut self,
        client: Arc<dyn InferenceClient>,
        kernel: Arc<AsyncMutex<Kernel>>,
    ) -> Self {
        let agent_listeners: Vec<_> = self
            .organism
            .listeners()
            .iter()
            .filter_map(|l| l.agent.as_ref().map(|cfg| (l.name.clone(), cfg.clone())))
            .collect();

        for (name, cfg) in agent_listeners {
            let composed = compose_prompt(&self.organism.prompt_blocks, &cfg.prompt_blocks, &Default::default());
            let system_prompt = conduit_agent::build_system_prompt(&composed, &[]);
            let handler = Arc::new(AgentHandler::new(
                Arc::clone(&client),
                Arc::clone(&kernel),
                system_prompt,
                cfg.model.clone(),
                cfg.max_tokens,
                cfg.max_iterations,
            ));
            self.registry.register(name, handler);
        }
        self
    }

    /// Attach a semantic router, registering every listener with a
    /// `request_schema` as a routing candidate (§4.7).
    pub fn with_router(mut self, provider: Arc<dyn EmbeddingProvider>, filler: Arc<dyn FormFillStrategy>, threshold: f32) -> Self {
        let mut router = SemanticRouter::new(provider, filler, threshold);
        router.register_tools(&self.organism);
        self.router = Some(router);
        self
    }

    pub fn with_repairer(mut self, repairer: Arc<dyn Repairer>) -> Self {
        self.repairer = Some(repairer);
        self
    }

    pub fn with_max_payload_bytes(mut self, max: usize) -> Self {
        self.max_payload_bytes = max;
        self
    }

    pub fn with_deadline(mut self, deadline: std::time::Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Open (or recover) the kernel, validate the organism, build the
    /// security resolver, and assemble the engine. Does not itself create
    /// the root thread — call [`Pipeline::initialize_root`] afterward.
    pub fn build(self) -> DispatchResult<Pipeline> {
        self.organism.validate().map_err(|e| DispatchError::Configuration {
            reason: e.to_string(),
        })?;

        let kernel = Kernel::open(&self.data_dir).map_err(DispatchError::from)?;
        let kernel = Arc::new(AsyncMutex::new(kernel));
        let security = Arc::new(SecurityResolver::from_organism(&self.organism));

        let mut engine = Engine::new(
            Arc::clone(&kernel),
            Arc::clone(&security),
            Arc::new(self.registry),
            self.validator,
        )
        .with_max_payload_bytes(self.max_payload_bytes)
        .with_deadline(self.deadline);

        if let Some(repairer) = self.repairer {
            engine = engine.with_repairer(repairer);
        }

        Ok(Pipeline {
            engine,
            security,
            organism: self.organism,
            kernel,
            router: self.router,
        })
    }

    /// Build a pipeline already wired against a kernel opened elsewhere —
    /// used when [`with_agents`] needs the same `Arc<Mutex<Kernel>>` the
    /// engine ends up using (the agent handler mirrors the engine's
    /// iteration-cap bookkeeping into the same kernel).
    pub fn build_with_kernel(self, kernel: Arc<AsyncMutex<Kernel>>) -> DispatchResult<Pipeline> {
        self.organism.validate().map_err(|e| DispatchError::Configuration {
            reason: e.to_string(),
        })?;

        let security = Arc::new(SecurityResolver::from_organism(&self.organism));

        let mut engine = Engine::new(
            Arc::clone(&kernel),
            Arc::clone(&security),
            Arc::new(self.registry),
            self.validator,
        )
        .with_max_payload_bytes(self.max_payload_bytes)
        .with_deadline(self.deadline);

        if let Some(repairer) = self.repairer {
            engine = engine.with_repairer(repairer);
        }

        Ok(Pipeline {
            engine,
            security,
            organism: self.organism,
            kernel,
            router: self.router,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_events::Response;

    const ORGANISM: &str = r#"
root_profile: coding
listeners:
  - name: file-read
    payload_tags: ["FileReadRequest"]
    response_schema: FileReadResponse
profiles:
  - name: coding
    permitted_listeners: ["file-read"]
    retention: retain_forever
"#;

    #[tokio::test]
    async fn builder_wires_a_working_pipeline() {
        let organism = parse_organism(ORGANISM).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let handler: Arc<dyn Handler> = Arc::new(FnHandler(|_payload: &[u8], _ctx| {
            Response::reply(b"<FileReadResponse>hi</FileReadResponse>".to_vec(), "FileReadResponse")
        }));

        let pipeline = PipelineBuilder::new(organism, dir.path())
            .register("file-read", handler)
            .unwrap()
            .build()
            .unwrap();

        pipeline.initialize_root().await.unwrap();

        let envelope = Envelope::new(
            "ns",
            "FileReadRequest",
            b"<FileReadRequest><path>x</path></FileReadRequest>".to_vec(),
            "ui",
            "root",
            "coding",
        );
        let ack = pipeline.submit(envelope).await.unwrap();
        assert_eq!(ack.envelopes_processed, 1);
    }

    #[tokio::test]
    async fn registering_an_undeclared_listener_is_a_configuration_error() {
        let organism = parse_organism(ORGANISM).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let handler: Arc<dyn Handler> = Arc::new(FnHandler(|_payload: &[u8], _ctx| Response::Silence));
        let err = PipelineBuilder::new(organism, dir.path())
            .register("ghost", handler)
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownListener { .. }));
    }
}
