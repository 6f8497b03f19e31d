//! Error types
//!
//! [`RequestError`] is what a caller's completion receives. The others stay
//! inside the link and end up in log lines or at the binary's edge.

use crate::protocol::{ErrorCode, EventKind, RequestKind, Truncated};
use thiserror::Error;

/// Terminal failure delivered to a request's completion.
///
/// `R` is the codec's response type. Only [`RequestError::Remote`] carries one:
/// some error replies still hold a payload worth decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError<R> {
    #[error("Radio transport unavailable")]
    TransportUnavailable,
    #[error("Modem returned {code}")]
    Remote {
        code: ErrorCode,
        /// Decoded from the error reply, if it had a payload that decoded.
        response: Option<R>,
    },
    #[error("Failed to decode {kind} response: {reason}")]
    DecodeFailure { kind: RequestKind, reason: String },
    #[error("Failed to encode {kind} request: {reason}")]
    EncodeFailure { kind: RequestKind, reason: String },
    #[error("{kind} request of {len} bytes exceeds the {max} byte frame limit")]
    Oversize {
        kind: RequestKind,
        len: usize,
        max: usize,
    },
    #[error("{kind} timed out waiting for a response")]
    TimedOut { kind: RequestKind },
    #[error("{kind} was superseded before it was sent")]
    Superseded { kind: RequestKind },
    #[error("{kind} rejected: ordering queue is full")]
    QueueFull { kind: RequestKind },
    #[error("Request abandoned during shutdown")]
    Abandoned,
}

impl<R> RequestError<R> {
    /// `Remote` without a decoded response.
    pub fn remote(code: ErrorCode) -> Self {
        RequestError::Remote {
            code,
            response: None,
        }
    }

    /// The modem's error code, for `Remote` failures.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            RequestError::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Failure raised by a [`PayloadCodec`](crate::payload::PayloadCodec).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error(transparent)]
    Truncated(#[from] Truncated),
    #[error("Invalid payload: {0}")]
    Invalid(String),
}

/// Frame-level failure reading from or writing to the socket.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Frame of {len} bytes exceeds the {max} byte limit")]
    Oversize { len: usize, max: usize },
}

impl FrameError {
    /// Recoverable errors drop one frame; the rest tear the connection down.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::Oversize { .. })
    }
}

/// A frame that violated the protocol. Logged and dropped, never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Unknown response type {0}")]
    UnknownResponseType(i32),
    #[error("Unknown unsolicited event {0}")]
    UnknownEvent(i32),
    #[error("Failed to decode {kind} event: {reason}")]
    EventDecode { kind: EventKind, reason: String },
    #[error(transparent)]
    Truncated(#[from] Truncated),
}

/// Link setup errors
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Socket connection error: {0}")]
    Connection(String),
}
