//! The organism definition (§6): named prompt blocks, listener
//! registrations, and profiles, as consumed from a YAML document.

use std::collections::{BTreeMap, HashMap};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AgentConfig {
    /// Names of prompt blocks to concatenate, in order, for this agent's
    /// system prompt.
    pub prompt_blocks: Vec<String>,
    pub max_tokens: u32,
    pub max_iterations: u32,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListenerDef {
    pub name: String,
    pub payload_tags: Vec<String>,
    #[serde(default)]
    pub request_schema: Option<String>,
    #[serde(default)]
    pub response_schema: Option<String>,
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default)]
    pub semantic_description: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub spawns_thread: bool,
    #[serde(default)]
    pub agent: Option<AgentConfig>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RetentionConfig {
    RetainForever,
    PruneOnDelivery,
    RetainDays(u32),
}

impl From<RetentionConfig> for conduit_kernel::RetentionPolicy {
    fn from(value: RetentionConfig) -> Self {
        match value {
            RetentionConfig::RetainForever => conduit_kernel::RetentionPolicy::RetainForever,
            RetentionConfig::PruneOnDelivery => conduit_kernel::RetentionPolicy::PruneOnDelivery,
            RetentionConfig::RetainDays(n) => conduit_kernel::RetentionPolicy::RetainDays(n),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProfileDef {
    pub name: String,
    /// Listener names permitted under this profile. Structural security
    /// (§4.2): anything not listed here is unreachable, not merely denied.
    pub permitted_listeners: Vec<String>,
    #[serde(default)]
    pub network_allowlist: Vec<String>,
    pub retention: RetentionConfig,
    #[serde(default)]
    pub identity: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Organism {
    #[serde(default)]
    pub prompt_blocks: BTreeMap<String, String>,
    pub listeners: Vec<ListenerDef>,
    pub profiles: Vec<ProfileDef>,
    /// Name of the profile the root thread is created with.
    pub root_profile: String,
}

impl Organism {
    pub fn get_listener(&self, name: &str) -> Option<&ListenerDef> {
        self.listeners.iter().find(|l| l.name == name)
    }

    pub fn get_profile(&self, name: &str) -> Option<&ProfileDef> {
        self.profiles.iter().find(|p| p.name == name)
    }

    pub fn listeners(&self) -> &[ListenerDef] {
        &self.listeners
    }

    pub fn profiles(&self) -> &[ProfileDef] {
        &self.profiles
    }

    /// Validate referential integrity and the ambiguous-route rule, in one
    /// pass, before the organism is used to build a pipeline.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut seen_listeners = std::collections::HashSet::new();
        for listener in &self.listeners {
            if !seen_listeners.insert(listener.name.clone()) {
                return Err(ConfigError::DuplicateListener(listener.name.clone()));
            }
            if let Some(agent) = &listener.agent {
                for block in &agent.prompt_blocks {
                    if !self.prompt_blocks.contains_key(block) {
                        return Err(ConfigError::UnknownPromptBlock {
                            listener: listener.name.clone(),
                            block: block.clone(),
                        });
                    }
                }
            }
        }

        let mut seen_profiles = std::collections::HashSet::new();
        for profile in &self.profiles {
            if !seen_profiles.insert(profile.name.clone()) {
                return Err(ConfigError::DuplicateProfile(profile.name.clone()));
            }

            for listener_name in &profile.permitted_listeners {
                if self.get_listener(listener_name).is_none() {
                    return Err(ConfigError::UnknownListener {
                        profile: profile.name.clone(),
                        listener: listener_name.clone(),
                    });
                }
            }

            // Ambiguous-route check: within this profile's permitted set,
            // no payload tag may resolve to more than one listener.
            let mut tag_owners: HashMap<&str, Vec<&str>> = HashMap::new();
            for listener_name in &profile.permitted_listeners {
                if let Some(listener) = self.get_listener(listener_name) {
                    for tag in &listener.payload_tags {
                        tag_owners
                            .entry(tag.as_str())
                            .or_default()
                            .push(listener.name.as_str());
                    }
                }
            }
            for (tag, owners) in tag_owners {
                if owners.len() > 1 {
                    return Err(ConfigError::AmbiguousRoute {
                        profile: profile.name.clone(),
                        tag: tag.to_string(),
                        listeners: owners.into_iter().map(String::from).collect(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Parse and validate an organism definition from a YAML document.
pub fn parse_organism(yaml: &str) -> ConfigResult<Organism> {
    let organism: Organism = serde_yaml::from_str(yaml)?;
    organism.validate()?;
    Ok(organism)
}
