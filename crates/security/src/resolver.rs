//! `SecurityResolver` — the single source of structural security (§4.2).
//! Built once from an [`Organism`], immutable thereafter; a hot reload
//! produces a brand new resolver (a new "generation") rather than mutating
//! this one, so running threads keep the security surface they were spawned
//! under (§3's invariant, §9's non-goal "hot code reload that mutates
//! running-thread security").

use std::collections::BTreeMap;

use conduit_config::Organism;
use conduit_events::{DispatchError, HandlerRegistration};

use crate::profile::Profile;

pub struct SecurityResolver {
    profiles: BTreeMap<String, Profile>,
    registrations: BTreeMap<String, HandlerRegistration>,
    generation: u64,
}

impl SecurityResolver {
    /// Build a resolver from organism configuration. The organism is
    /// assumed already validated (`Organism::validate`/`parse_organism`
    /// reject ambiguous routes and dangling references at load time) so
    /// this constructor cannot itself fail.
    pub fn from_organism(organism: &Organism) -> Self {
        Self::build(organism, 0)
    }

    fn build(organism: &Organism, generation: u64) -> Self {
        let mut registrations = BTreeMap::new();
        for listener in organism.listeners() {
            let mut registration = HandlerRegistration::new(
                listener.name.clone(),
                listener.payload_tags.clone(),
            )
            .with_description(listener.description.clone())
            .with_peers(listener.peers.clone());
            if let Some(schema) = &listener.request_schema {
                registration = registration.with_request_schema(schema.clone());
            }
            if let Some(schema) = &listener.response_schema {
                registration = registration.with_response_schema(schema.clone());
            }
            if let Some(desc) = &listener.semantic_description {
                registration = registration.with_semantic_description(desc.clone());
            }
            if listener.spawns_thread {
                registration = registration.spawning_thread();
            }
            registrations.insert(listener.name.clone(), registration);
        }

        let mut profiles = BTreeMap::new();
        for profile_def in organism.profiles() {
            let permitted_listeners: std::collections::HashSet<String> =
                profile_def.permitted_listeners.iter().cloned().collect();

            let mut dispatch_table = BTreeMap::new();
            for listener_name in &profile_def.permitted_listeners {
                if let Some(listener) = organism.get_listener(listener_name) {
                    for tag in &listener.payload_tags {
                        // Organism::validate already rejected ambiguous
                        // routes, so this insert never overwrites a
                        // different handler.
                        dispatch_table.insert(tag.clone(), listener.name.clone());
                    }
                }
            }

            profiles.insert(
                profile_def.name.clone(),
                Profile {
                    name: profile_def.name.clone(),
                    dispatch_table,
                    permitted_listeners,
                    network_allowlist: profile_def.network_allowlist.iter().cloned().collect(),
                    retention: profile_def.retention.into(),
                    identity: profile_def.identity.clone(),
                },
            );
        }

        Self {
            profiles,
            registrations,
            generation,
        }
    }

    /// Produce a new resolver generation from updated organism
    /// configuration. Does not touch `self` — callers swap their reference
    /// (typically an `Arc`) to the returned value; anything already holding
    /// the old `Arc` (a running thread) keeps the old security surface.
    pub fn rebuild(&self, organism: &Organism) -> Self {
        Self::build(organism, self.generation + 1)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, DispatchError> {
        self.profiles.get(name).ok_or_else(|| DispatchError::UnknownProfile {
            profile: name.to_string(),
        })
    }

    pub fn registration(&self, handler: &str) -> Option<&HandlerRegistration> {
        self.registrations.get(handler)
    }

    /// §4.1 stage 3: look up the route for `tag` under `profile`. `None`
    /// means the route is structurally absent — callers turn that into
    /// `RouteNotFound` and an audit log line, never a silent skip.
    pub fn resolve(&self, profile: &str, tag: &str) -> Result<Option<&str>, DispatchError> {
        Ok(self.profile(profile)?.route(tag))
    }

    pub fn is_permitted(&self, profile: &str, handler: &str) -> Result<bool, DispatchError> {
        Ok(self.profile(profile)?.permits(handler))
    }

    pub fn retention(&self, profile: &str) -> Result<conduit_kernel::RetentionPolicy, DispatchError> {
        Ok(self.profile(profile)?.retention)
    }

    pub fn can_reach(&self, profile: &str, host_port: &str) -> Result<bool, DispatchError> {
        Ok(self.profile(profile)?.can_reach(host_port))
    }

    pub fn allowed_handlers<'a>(&'a self, profile: &str) -> Result<Vec<&'a str>, DispatchError> {
        Ok(self.profile(profile)?.allowed_handlers().collect())
    }

    /// §4.3: a spawn of `child_profile` under `parent_profile` is permitted
    /// only if the child's dispatch table is contained in the parent's.
    pub fn permits_spawn(&self, parent_profile: &str, child_profile: &str) -> Result<bool, DispatchError> {
        let parent = self.profile(parent_profile)?;
        let child = self.profile(child_profile)?;
        Ok(child.is_subset_of(parent))
    }
}
