//! Configuration-time errors. These are distinct from `DispatchError`
//! because they can only occur at startup, before a pipeline exists to
//! report them through.

use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse organism YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// §9's first Open Question, resolved: two listeners registering the
    /// same payload tag within one profile is a startup error, not
    /// silent first-wins.
    #[error("profile '{profile}' has more than one listener registered for tag '{tag}': {listeners:?}")]
    AmbiguousRoute {
        profile: String,
        tag: String,
        listeners: Vec<String>,
    },

    #[error("profile '{profile}' permits unknown listener '{listener}'")]
    UnknownListener { profile: String, listener: String },

    #[error("listener '{listener}' references unknown prompt block '{block}'")]
    UnknownPromptBlock { listener: String, block: String },

    #[error("duplicate profile name '{0}'")]
    DuplicateProfile(String),

    #[error("duplicate listener name '{0}'")]
    DuplicateListener(String),
}
