//! # Configuration
//!
//! Plain, validated configuration shared by the library and the
//! `tileflowd` binary. Kept deliberately small: the server has few knobs.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Server-wide configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on. Default `0.0.0.0:1701`.
    pub listen_addr: SocketAddr,
    /// Size of the credit window: how many frames a peer may have in
    /// flight before it must wait for `requestFrame`. Default `1`, which is
    /// also the only value the dispatcher's boolean `allowed_to_send` flag
    /// currently honors; values above 1 validate but do not yet widen the
    /// window — see DESIGN.md.
    pub credit_window: u32,
    /// Optional cap on queued batches per source before a stream is
    /// failed as stream-fatal. `None` = unbounded.
    pub max_backlog_per_source: Option<usize>,
}

/// Raised by [`ServerConfig::validate`] when a field is out of range.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid config: field `{field}` = `{value}`: {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub value: String,
    pub reason: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 1701),
            credit_window: 1,
            max_backlog_per_source: None,
        }
    }
}

impl ServerConfig {
    pub fn new(port: u16, credit_window: u32, max_backlog_per_source: Option<usize>) -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            credit_window,
            max_backlog_per_source,
        }
    }

    /// Validate that the configuration can plausibly be started.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.credit_window == 0 {
            return Err(ConfigError {
                field: "credit_window",
                value: self.credit_window.to_string(),
                reason: "must be at least 1".into(),
            });
        }
        if let Some(0) = self.max_backlog_per_source {
            return Err(ConfigError {
                field: "max_backlog_per_source",
                value: "0".into(),
                reason: "a backlog cap of 0 would fail every stream immediately".into(),
            });
        }
        Ok(())
    }
}
