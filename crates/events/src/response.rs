//! What a handler hands back to the engine (§4.1 stage 5).

use crate::error::DispatchError;

/// A single output produced by a handler, still carrying its own tag —
/// the engine validates this against the *producing* handler's response
/// schema before it is allowed to re-enter as a new envelope (§4.1 stage 6).
#[derive(Debug, Clone)]
pub struct Output {
    pub target: String,
    pub payload: Vec<u8>,
    pub payload_tag: String,
}

impl Output {
    pub fn new(target: impl Into<String>, payload: impl Into<Vec<u8>>, payload_tag: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            payload: payload.into(),
            payload_tag: payload_tag.into(),
        }
    }
}

/// A handler's response variant (§4.1 stage 5).
#[derive(Debug, Clone)]
pub enum Response {
    /// Reply to the original sender.
    Reply { payload: Vec<u8>, payload_tag: String },
    /// Send to a named target (not necessarily the sender).
    Send {
        target: String,
        payload: Vec<u8>,
        payload_tag: String,
    },
    /// Send to multiple targets.
    Broadcast(Vec<Output>),
    /// No output; the engine synthesizes an Ack to the sender.
    Silence,
    /// The handler itself failed; the engine synthesizes an error envelope
    /// to the sender instead of attempting re-entry.
    Error { kind: String, message: String },
}

impl Response {
    pub fn reply(payload: impl Into<Vec<u8>>, payload_tag: impl Into<String>) -> Self {
        Response::Reply {
            payload: payload.into(),
            payload_tag: payload_tag.into(),
        }
    }

    pub fn send(target: impl Into<String>, payload: impl Into<Vec<u8>>, payload_tag: impl Into<String>) -> Self {
        Response::Send {
            target: target.into(),
            payload: payload.into(),
            payload_tag: payload_tag.into(),
        }
    }

    pub fn error(err: &DispatchError) -> Self {
        Response::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_carries_kind_and_message() {
        let err = DispatchError::NoCapability;
        let resp = Response::error(&err);
        match resp {
            Response::Error { kind, message } => {
                assert_eq!(kind, "NoCapability");
                assert!(!message.is_empty());
            }
            _ => panic!("expected Error"),
        }
    }
}
