//! Kernel-local error type. Converts into `conduit_events::DispatchError`
//! at the boundary so callers outside the kernel only ever see the one
//! shared taxonomy.

use conduit_events::DispatchError;
use thiserror::Error;

pub type KernelResult<T> = Result<T, KernelError>;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("write-ahead log corrupted at lsn {lsn}: {reason}")]
    CorruptedWal { lsn: u64, reason: String },

    #[error("checkpoint is inconsistent with the write-ahead log: {reason}")]
    CheckpointInconsistent { reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown thread '{0}'")]
    UnknownThread(String),

    #[error("unknown segment '{0}'")]
    UnknownSegment(String),

    #[error("unknown journal entry '{0}'")]
    UnknownMessage(String),

    #[error("thread '{parent}' cannot spawn a child with a wider profile")]
    PrivilegeEscalation { parent: String },
}

impl From<KernelError> for DispatchError {
    fn from(e: KernelError) -> Self {
        match e {
            KernelError::Io(io) => DispatchError::Io {
                reason: io.to_string(),
            },
            KernelError::CorruptedWal { lsn, reason } => DispatchError::CorruptedWal { lsn, reason },
            KernelError::CheckpointInconsistent { reason } => {
                DispatchError::CheckpointInconsistent { reason }
            }
            KernelError::Serialization(e) => DispatchError::Io {
                reason: e.to_string(),
            },
            KernelError::UnknownThread(thread_id) => DispatchError::UnknownThread { thread_id },
            KernelError::UnknownSegment(id) => DispatchError::Configuration {
                reason: format!("unknown segment '{id}'"),
            },
            KernelError::UnknownMessage(id) => DispatchError::Configuration {
                reason: format!("unknown journal entry '{id}'"),
            },
            KernelError::PrivilegeEscalation { parent } => DispatchError::PrivilegeEscalation {
                parent,
                requested: String::new(),
            },
        }
    }
}
