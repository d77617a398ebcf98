//! Organism configuration (§6): typed listener/profile/agent definitions
//! loaded from YAML, plus prompt composition. CLI flag parsing and the
//! concrete YAML loader binary are external collaborators; this crate owns
//! only the typed shape and its validation.

mod error;
mod organism;
mod prompt;

pub use error::{ConfigError, ConfigResult};
pub use organism::{parse_organism, AgentConfig, ListenerDef, Organism, ProfileDef, RetentionConfig};
pub use prompt::compose_prompt;
