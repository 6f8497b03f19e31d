//! Little-endian body encoding
//!
//! Frame bodies use the modem's native parcel layout: a sequence of
//! little-endian `i32` fields followed by an opaque payload.

use super::{RequestKind, Serial};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("frame body truncated: needed {needed} more bytes, {available} available")]
pub struct Truncated {
    pub needed: usize,
    pub available: usize,
}

/// Cursor over an inbound frame body.
pub struct ParcelReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ParcelReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn read_i32(&mut self) -> Result<i32, Truncated> {
        let rest = self.remaining();
        let Some(bytes) = rest.get(..4) else {
            return Err(Truncated {
                needed: 4,
                available: rest.len(),
            });
        };
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        self.pos += 4;
        Ok(i32::from_le_bytes(raw))
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

/// Build the body of an outbound request frame.
pub fn request_body(kind: RequestKind, serial: Serial, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(8 + payload.len());
    body.extend_from_slice(&kind.as_i32().to_le_bytes());
    body.extend_from_slice(&serial.to_le_bytes());
    body.extend_from_slice(payload);
    body
}
