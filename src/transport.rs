//! Socket transport to the modem process
//!
//! The transport layer is organized into:
//! - `codec`: length-prefixed framing
//! - `sender`: the single writer task
//! - `connection`: connect/read/reconnect loop

pub mod codec;
pub mod connection;
pub mod sender;

use crate::error::LinkError;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use tokio::net::UnixStream;

pub use codec::FrameCodec;

/// Default modem socket name. `@` selects the Linux abstract namespace.
pub const DEFAULT_SOCKET: &str = "@rild";

/// Connection state, cyclic while the link runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
        })
    }
}

/// Where the modem listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Path(PathBuf),
    Abstract(String),
}

impl Endpoint {
    pub fn parse(name: &str) -> Self {
        match name.strip_prefix('@') {
            Some(abstract_name) => Endpoint::Abstract(abstract_name.to_string()),
            None => Endpoint::Path(PathBuf::from(name)),
        }
    }

    /// Endpoint for a modem slot. Slot 0 keeps `base`, slot n appends n + 1.
    pub fn for_slot(base: &str, slot: u32) -> Self {
        if slot == 0 {
            Self::parse(base)
        } else {
            Self::parse(&format!("{}{}", base, slot + 1))
        }
    }

    pub async fn connect(&self) -> Result<UnixStream, LinkError> {
        let result = match self {
            Endpoint::Path(path) => UnixStream::connect(path).await,
            Endpoint::Abstract(name) => connect_abstract(name),
        };
        result.map_err(|e| match e.kind() {
            std::io::ErrorKind::ConnectionRefused => {
                LinkError::Connection(format!("Modem socket {} refused the connection", self))
            }
            std::io::ErrorKind::NotFound => {
                LinkError::Connection(format!("Modem socket not found at {}", self))
            }
            _ => LinkError::Connection(format!("Failed to connect to {}: {}", self, e)),
        })
    }
}

#[cfg(target_os = "linux")]
fn connect_abstract(name: &str) -> std::io::Result<UnixStream> {
    use std::os::linux::net::SocketAddrExt;

    let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())?;
    let stream = std::os::unix::net::UnixStream::connect_addr(&addr)?;
    stream.set_nonblocking(true)?;
    UnixStream::from_std(stream)
}

#[cfg(not(target_os = "linux"))]
fn connect_abstract(name: &str) -> std::io::Result<UnixStream> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("abstract socket @{} needs Linux", name),
    ))
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Path(path) => write!(f, "{}", path.display()),
            Endpoint::Abstract(name) => write!(f, "@{}", name),
        }
    }
}
