//! Handler registration (§3). Frozen after startup.

/// Static metadata a handler is registered with. Once the registry that
/// holds these is frozen, nothing about a registration changes for the life
/// of the pipeline instance.
#[derive(Debug, Clone)]
pub struct HandlerRegistration {
    pub name: String,
    pub payload_tags: Vec<String>,
    pub request_schema: Option<String>,
    pub response_schema: Option<String>,
    pub description: String,
    pub semantic_description: Option<String>,
    pub peers: Vec<String>,
    /// When true, the engine spawns a child thread before dispatching to
    /// this handler (§4.1's "Spawn-bearing tags").
    pub spawns_thread: bool,
}

impl HandlerRegistration {
    pub fn new(name: impl Into<String>, payload_tags: Vec<String>) -> Self {
        Self {
            name: name.into(),
            payload_tags,
            request_schema: None,
            response_schema: None,
            description: String::new(),
            semantic_description: None,
            peers: Vec::new(),
            spawns_thread: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_semantic_description(mut self, description: impl Into<String>) -> Self {
        self.semantic_description = Some(description.into());
        self
    }

    pub fn with_response_schema(mut self, schema_ref: impl Into<String>) -> Self {
        self.response_schema = Some(schema_ref.into());
        self
    }

    pub fn with_request_schema(mut self, schema_ref: impl Into<String>) -> Self {
        self.request_schema = Some(schema_ref.into());
        self
    }

    pub fn with_peers(mut self, peers: Vec<String>) -> Self {
        self.peers = peers;
        self
    }

    pub fn spawning_thread(mut self) -> Self {
        self.spawns_thread = true;
        self
    }
}
