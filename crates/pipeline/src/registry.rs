//! `ListenerRegistry` — the frozen map from handler name to its live
//! `Handler` implementation. Registration metadata (schemas, peers,
//! `spawns_thread`) lives in `conduit_security::SecurityResolver`; this
//! registry holds only the executable side.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::handler::Handler;

#[derive(Default)]
pub struct ListenerRegistry {
    handlers: BTreeMap<String, Arc<dyn Handler>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
