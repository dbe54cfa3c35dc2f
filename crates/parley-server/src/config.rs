// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Chat server configuration.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use thiserror::Error;

/// Chat server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 127.0.0.1)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// TCP port to listen on (default: 8080, 0 = ephemeral)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Hard cap on a single inbound line, terminator excluded (bytes)
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,

    /// Slots in the dispatcher's inbound event queue
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,

    /// Slots in each connection's outbound queue
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Disable Nagle on accepted sockets
    #[serde(default = "default_true")]
    pub tcp_nodelay: bool,

    /// Consecutive accept failures tolerated before the listener is considered dead
    #[serde(default = "default_max_accept_errors")]
    pub max_accept_errors: u32,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_port() -> u16 {
    8080
}

fn default_max_line_length() -> usize {
    4 * 1024
}

fn default_event_queue_capacity() -> usize {
    256
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_true() -> bool {
    true
}

fn default_max_accept_errors() -> u32 {
    16
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            max_line_length: default_max_line_length(),
            event_queue_capacity: default_event_queue_capacity(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            tcp_nodelay: true,
            max_accept_errors: default_max_accept_errors(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Socket address the listener binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Override bind address and port from a single socket address.
    pub fn set_listen_addr(&mut self, addr: SocketAddr) {
        self.bind_address = addr.ip();
        self.port = addr.port();
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_line_length == 0 {
            return Err(ConfigError::InvalidValue(
                "max_line_length cannot be 0".into(),
            ));
        }
        // tokio's bounded channels panic on a zero capacity
        if self.event_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "event_queue_capacity cannot be 0".into(),
            ));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "outbound_queue_capacity cannot be 0".into(),
            ));
        }
        if self.max_accept_errors == 0 {
            return Err(ConfigError::InvalidValue(
                "max_accept_errors cannot be 0".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Serialize error: {0}")]
    Serialize(serde_json::Error),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}
