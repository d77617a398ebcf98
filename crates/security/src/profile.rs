//! The runtime `Profile` (§3): a named security context binding a dispatch
//! table, network allowlist, retention policy, and identity. Built once
//! from organism configuration and never mutated afterward (§3's "profiles
//! are static for the lifetime of the pipeline instance").

use std::collections::{BTreeMap, HashSet};

use conduit_kernel::RetentionPolicy;

#[derive(Debug, Clone)]
pub struct Profile {
    pub name: String,
    /// tag -> handler name. Closed-world: absence means structurally
    /// unreachable, not merely denied (§4.2).
    pub(crate) dispatch_table: BTreeMap<String, String>,
    pub(crate) permitted_listeners: HashSet<String>,
    pub network_allowlist: HashSet<String>,
    pub retention: RetentionPolicy,
    pub identity: Option<String>,
}

impl Profile {
    pub fn route(&self, tag: &str) -> Option<&str> {
        self.dispatch_table.get(tag).map(String::as_str)
    }

    pub fn permits(&self, handler: &str) -> bool {
        self.permitted_listeners.contains(handler)
    }

    pub fn allowed_handlers(&self) -> impl Iterator<Item = &str> {
        self.permitted_listeners.iter().map(String::as_str)
    }

    pub fn can_reach(&self, host_port: &str) -> bool {
        self.network_allowlist.contains(host_port)
    }

    /// `self` (the child) is a permitted spawn target under `parent` iff
    /// every listener `self` permits is also permitted by `parent` (§3,
    /// §4.3's "child's dispatch table is not contained in the parent's").
    pub fn is_subset_of(&self, parent: &Profile) -> bool {
        self.permitted_listeners.is_subset(&parent.permitted_listeners)
    }
}
