//! The error taxonomy (§7). Every user-visible failure is a structured
//! `DispatchError` — kind, message, and an optional path — never an ad-hoc
//! string.

use thiserror::Error;

pub type DispatchResult<T> = Result<T, DispatchError>;

/// The complete set of error kinds a submission can terminate in.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DispatchError {
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope { reason: String },

    #[error("schema violation at {path}: {reason}")]
    SchemaViolation { path: String, reason: String },

    #[error("no route for tag '{tag}' under profile '{profile}'")]
    RouteNotFound { profile: String, tag: String },

    #[error("unknown thread '{thread_id}'")]
    UnknownThread { thread_id: String },

    #[error("unknown profile '{profile}'")]
    UnknownProfile { profile: String },

    #[error("response from handler '{handler}' violated its response schema: {reason}")]
    ResponseSchemaViolation { handler: String, reason: String },

    #[error("spawn of profile '{requested}' under parent '{parent}' denied: not a subset")]
    PrivilegeEscalation { parent: String, requested: String },

    #[error("payload of {size} bytes exceeds the configured maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("dispatch on thread '{thread_id}' timed out")]
    Timeout { thread_id: String },

    #[error("thread '{thread_id}' exceeded its iteration cap of {cap}")]
    IterationCapExceeded { thread_id: String, cap: u32 },

    #[error("form fill failed for handler '{handler}': {reason}")]
    FormFillFailed { handler: String, reason: String },

    #[error("no permitted handler has capability for this request")]
    NoCapability,

    #[error("write-ahead log is corrupted at lsn {lsn}: {reason}")]
    CorruptedWal { lsn: u64, reason: String },

    #[error("checkpoint is inconsistent with the write-ahead log: {reason}")]
    CheckpointInconsistent { reason: String },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("i/o error: {reason}")]
    Io { reason: String },
}

impl DispatchError {
    /// A short machine-stable kind tag, for audit logging and tests.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::MalformedEnvelope { .. } => "MalformedEnvelope",
            DispatchError::SchemaViolation { .. } => "SchemaViolation",
            DispatchError::RouteNotFound { .. } => "RouteNotFound",
            DispatchError::UnknownThread { .. } => "UnknownThread",
            DispatchError::UnknownProfile { .. } => "UnknownProfile",
            DispatchError::ResponseSchemaViolation { .. } => "ResponseSchemaViolation",
            DispatchError::PrivilegeEscalation { .. } => "PrivilegeEscalation",
            DispatchError::PayloadTooLarge { .. } => "PayloadTooLarge",
            DispatchError::Timeout { .. } => "Timeout",
            DispatchError::IterationCapExceeded { .. } => "IterationCapExceeded",
            DispatchError::FormFillFailed { .. } => "FormFillFailed",
            DispatchError::NoCapability => "NoCapability",
            DispatchError::CorruptedWal { .. } => "CorruptedWal",
            DispatchError::CheckpointInconsistent { .. } => "CheckpointInconsistent",
            DispatchError::Configuration { .. } => "Configuration",
            DispatchError::Io { .. } => "Io",
        }
    }
}

impl From<std::io::Error> for DispatchError {
    fn from(e: std::io::Error) -> Self {
        DispatchError::Io {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable() {
        let e = DispatchError::RouteNotFound {
            profile: "researcher".into(),
            tag: "FileWriteRequest".into(),
        };
        assert_eq!(e.kind(), "RouteNotFound");
        assert!(e.to_string().contains("FileWriteRequest"));
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let d: DispatchError = io_err.into();
        assert_eq!(d.kind(), "Io");
    }
}
