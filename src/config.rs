//! Link configuration
//!
//! Read from `~/.config/rilink/config.toml` when present. Every field has a
//! default, so a partial file (or none at all) is fine.

use crate::engine::accountant::{DEFAULT_ACK_WAKE_LOCK_TIMEOUT, DEFAULT_WAKE_LOCK_TIMEOUT};
use crate::engine::policy::DEFAULT_BLOCKING_TIMEOUT;
use crate::link::gate::DEFAULT_QUEUE_LIMIT;
use crate::transport::codec::MAX_COMMAND_BYTES;
use crate::transport::connection::{DEFAULT_RETRY_INTERVAL, DEFAULT_RETRY_LOG_THRESHOLD};
use crate::transport::{DEFAULT_SOCKET, Endpoint};
use anyhow::Context;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Socket path or `@name` for the abstract namespace.
    /// `$UID` and `$RUNTIME_DIRECTORY` are expanded.
    pub socket: String,

    /// Modem slot. Slot n > 0 appends n + 1 to the socket name.
    pub slot: u32,

    pub retry_interval_ms: u64,

    /// Failed connection attempts logged before retries go quiet
    pub retry_log_threshold: u32,

    pub wake_lock_timeout_ms: u64,
    pub ack_wake_lock_timeout_ms: u64,

    /// How long GET_ACTIVITY_INFO and the LCE requests may stay unanswered
    pub blocking_response_timeout_ms: u64,

    pub max_outbound_frame: usize,
    pub max_inbound_frame: usize,

    /// Bound on queued DTMF and call-control requests
    pub dtmf_queue_limit: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            socket: DEFAULT_SOCKET.to_string(),
            slot: 0,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL.as_millis() as u64,
            retry_log_threshold: DEFAULT_RETRY_LOG_THRESHOLD,
            wake_lock_timeout_ms: DEFAULT_WAKE_LOCK_TIMEOUT.as_millis() as u64,
            ack_wake_lock_timeout_ms: DEFAULT_ACK_WAKE_LOCK_TIMEOUT.as_millis() as u64,
            blocking_response_timeout_ms: DEFAULT_BLOCKING_TIMEOUT.as_millis() as u64,
            max_outbound_frame: MAX_COMMAND_BYTES,
            max_inbound_frame: MAX_COMMAND_BYTES,
            dtmf_queue_limit: DEFAULT_QUEUE_LIMIT,
        }
    }
}

impl LinkConfig {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file at the default location yields defaults; an explicit
    /// path must exist.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match config_path() {
                Some(path) => (path, false),
                None => {
                    tracing::debug!("no config directory, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        if !explicit && !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::for_slot(&expand_socket_path(&self.socket), self.slot)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn wake_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.wake_lock_timeout_ms)
    }

    pub fn ack_wake_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_wake_lock_timeout_ms)
    }

    pub fn blocking_response_timeout(&self) -> Duration {
        Duration::from_millis(self.blocking_response_timeout_ms)
    }
}

/// `~/.config/rilink/config.toml`
pub fn config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "rilink").map(|dirs| dirs.config_dir().join("config.toml"))
}

fn get_uid() -> String {
    std::env::var("UID").unwrap_or_else(|_| nix::unistd::getuid().to_string())
}

pub fn expand_socket_path(path: &str) -> String {
    let expanded = path.replace("$UID", &get_uid());

    // systemd RuntimeDirectory=
    if let Ok(runtime_dir) = std::env::var("RUNTIME_DIRECTORY") {
        expanded.replace("$RUNTIME_DIRECTORY", &runtime_dir)
    } else {
        expanded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.retry_interval(), Duration::from_secs(4));
        assert_eq!(config.retry_log_threshold, 8);
        assert_eq!(config.wake_lock_timeout(), Duration::from_secs(60));
        assert_eq!(config.ack_wake_lock_timeout(), Duration::from_millis(200));
        assert_eq!(config.max_outbound_frame, 8 * 1024);
        assert_eq!(config.endpoint(), Endpoint::Abstract("rild".to_string()));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = LinkConfig::from_toml("slot = 1\nretry_interval_ms = 250\n").unwrap();
        assert_eq!(config.slot, 1);
        assert_eq!(config.retry_interval(), Duration::from_millis(250));
        assert_eq!(config.dtmf_queue_limit, DEFAULT_QUEUE_LIMIT);
        assert_eq!(config.endpoint().to_string(), "@rild2");
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = LinkConfig {
            socket: "/run/rild.sock".to_string(),
            blocking_response_timeout_ms: 750,
            ..LinkConfig::default()
        };
        let toml = toml::to_string(&config).unwrap();
        assert_eq!(LinkConfig::from_toml(&toml).unwrap(), config);
    }

    #[test]
    fn test_unknown_type_is_an_error() {
        assert!(LinkConfig::from_toml("slot = \"one\"").is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let path = std::env::temp_dir()
            .join(format!("rilink-missing-{}.toml", uuid::Uuid::new_v4()));
        assert!(LinkConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn test_uid_expansion() {
        let expanded = expand_socket_path("/run/user/$UID/rild");
        assert!(!expanded.contains("$UID"));
    }
}
