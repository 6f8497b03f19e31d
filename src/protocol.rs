//! Wire-level vocabulary shared by the sender and the dispatcher
//!
//! Every frame body starts with a little-endian `i32` discriminant. Outbound
//! bodies carry `[kind][serial][payload]`; inbound bodies carry a
//! [`ResponseType`] followed by type-specific fields.

mod kinds;
mod parcel;

use serde::Serialize;
use std::fmt;

pub use kinds::{EventKind, RequestKind};
pub use parcel::{ParcelReader, Truncated, request_body};

/// Per-request correlation number. Travels on the wire as an `i32`.
pub type Serial = i32;

/// Discriminant of a bare protocol acknowledgment frame.
pub const RESPONSE_ACKNOWLEDGEMENT: i32 = 800;

/// Leading discriminant of every inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ResponseType {
    Solicited = 0,
    Unsolicited = 1,
    SolicitedAck = 2,
    SolicitedAckExp = 3,
    UnsolicitedAckExp = 4,
}

impl ResponseType {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Solicited),
            1 => Some(Self::Unsolicited),
            2 => Some(Self::SolicitedAck),
            3 => Some(Self::SolicitedAckExp),
            4 => Some(Self::UnsolicitedAckExp),
            _ => None,
        }
    }

    /// Whether the modem expects a protocol ack for this frame.
    pub fn expects_ack(self) -> bool {
        matches!(self, Self::SolicitedAckExp | Self::UnsolicitedAckExp)
    }
}

/// Error code carried by a solicited response. Zero means success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
    pub const SUCCESS: Self = Self(0);
    pub const RADIO_NOT_AVAILABLE: Self = Self(1);
    pub const GENERIC_FAILURE: Self = Self(2);
    pub const PASSWORD_INCORRECT: Self = Self(3);
    pub const SIM_PIN2: Self = Self(4);
    pub const SIM_PUK2: Self = Self(5);
    pub const REQUEST_NOT_SUPPORTED: Self = Self(6);
    pub const CANCELLED: Self = Self(7);

    pub fn is_success(self) -> bool {
        self.0 == 0
    }

    pub fn name(self) -> Option<&'static str> {
        match self.0 {
            0 => Some("SUCCESS"),
            1 => Some("RADIO_NOT_AVAILABLE"),
            2 => Some("GENERIC_FAILURE"),
            3 => Some("PASSWORD_INCORRECT"),
            4 => Some("SIM_PIN2"),
            5 => Some("SIM_PUK2"),
            6 => Some("REQUEST_NOT_SUPPORTED"),
            7 => Some("CANCELLED"),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.0),
            None => write!(f, "error {}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_type_discriminants() {
        assert_eq!(ResponseType::from_i32(0), Some(ResponseType::Solicited));
        assert_eq!(ResponseType::from_i32(4), Some(ResponseType::UnsolicitedAckExp));
        assert_eq!(ResponseType::from_i32(5), None);
        assert_eq!(ResponseType::from_i32(-1), None);
    }

    #[test]
    fn test_only_exp_types_expect_ack() {
        assert!(ResponseType::SolicitedAckExp.expects_ack());
        assert!(ResponseType::UnsolicitedAckExp.expects_ack());
        assert!(!ResponseType::Solicited.expects_ack());
        assert!(!ResponseType::SolicitedAck.expects_ack());
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(
            ErrorCode::REQUEST_NOT_SUPPORTED.to_string(),
            "REQUEST_NOT_SUPPORTED (6)"
        );
        assert_eq!(ErrorCode(77).to_string(), "error 77");
    }
}
