//! Payload codec boundary
//!
//! The per-kind payload catalog lives outside this crate. The link only needs
//! to turn typed parameters into bytes and bytes back into typed values, keyed
//! by kind. Codec failures come back as [`CodecError`] values and are turned
//! into delivered errors by the link; they never unwind into the read loop.

use crate::error::CodecError;
use crate::protocol::{EventKind, RequestKind};
use std::fmt;

pub trait PayloadCodec: Send + Sync + 'static {
    type Params: Send + 'static;
    type Response: Send + fmt::Debug + 'static;
    type Event: Clone + Send + fmt::Debug + 'static;

    fn encode(&self, kind: RequestKind, params: &Self::Params) -> Result<Vec<u8>, CodecError>;

    fn decode_response(&self, kind: RequestKind, body: &[u8])
    -> Result<Self::Response, CodecError>;

    fn decode_event(&self, kind: EventKind, body: &[u8]) -> Result<Self::Event, CodecError>;

    /// Conservative stand-in result used by the quirk table and by blocking
    /// kinds that time out. `None` means the kind has no safe default.
    fn default_response(&self, _kind: RequestKind) -> Option<Self::Response> {
        None
    }
}

/// Pass-through codec: parameters, responses and events are raw bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl PayloadCodec for RawCodec {
    type Params = Vec<u8>;
    type Response = Vec<u8>;
    type Event = Vec<u8>;

    fn encode(&self, _kind: RequestKind, params: &Vec<u8>) -> Result<Vec<u8>, CodecError> {
        Ok(params.clone())
    }

    fn decode_response(&self, _kind: RequestKind, body: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(body.to_vec())
    }

    fn decode_event(&self, _kind: EventKind, body: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(body.to_vec())
    }

    fn default_response(&self, _kind: RequestKind) -> Option<Vec<u8>> {
        Some(Vec::new())
    }
}
