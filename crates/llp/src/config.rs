//! Adapter configuration.
//!
//! Every field has a default so an empty TOML document is a valid
//! configuration:
//!
//! ```
//! use llp::config::{LlpConfig, SocketKind};
//!
//! let config = LlpConfig::from_toml_str(
//!     r#"
//!     socket_kind = "datagram"
//!     local_port = 4500
//!     "#,
//! )?;
//! assert_eq!(config.socket_kind, SocketKind::Datagram);
//! assert_eq!(config.buffer_capacity, llp::DEFAULT_BUFFER_CAPACITY);
//! # Ok::<(), llp::LlpError>(())
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::LlpError;

/// IP protocol number used for raw sockets unless configured otherwise (GRE).
pub const DEFAULT_PROTOCOL: u8 = 47;

/// Receive buffer capacity in bytes.
pub const DEFAULT_BUFFER_CAPACITY: usize = 4096;

/// Largest buffer that can be useful for a single IPv4 datagram.
pub const MAX_BUFFER_CAPACITY: usize = 65535;

/// The kind of socket the adapter opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketKind {
    /// `SOCK_RAW` for [`LlpConfig::protocol`]. Not port-addressed; received
    /// datagrams include the IPv4 header.
    #[default]
    Raw,
    /// `SOCK_DGRAM` over UDP, bound to [`LlpConfig::local_port`].
    Datagram,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlpConfig {
    pub socket_kind: SocketKind,
    /// Only used for [`SocketKind::Raw`].
    pub protocol: u8,
    /// Only used for [`SocketKind::Datagram`]; 0 picks an ephemeral port.
    pub local_port: u16,
    /// Size of the single receive buffer. Longer datagrams are truncated.
    pub buffer_capacity: usize,
}

impl Default for LlpConfig {
    fn default() -> Self {
        Self {
            socket_kind: SocketKind::default(),
            protocol: DEFAULT_PROTOCOL,
            local_port: 0,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

impl LlpConfig {
    /// Configuration for a UDP socket on `local_port`.
    pub fn datagram(local_port: u16) -> Self {
        Self {
            socket_kind: SocketKind::Datagram,
            local_port,
            ..Self::default()
        }
    }

    /// Configuration for a raw socket carrying `protocol`.
    pub fn raw(protocol: u8) -> Self {
        Self {
            socket_kind: SocketKind::Raw,
            protocol,
            ..Self::default()
        }
    }

    pub fn with_buffer_capacity(mut self, buffer_capacity: usize) -> Self {
        self.buffer_capacity = buffer_capacity;
        self
    }

    pub fn from_toml_str(s: &str) -> Result<Self, LlpError> {
        let config: Self =
            toml::from_str(s).map_err(|e| LlpError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, LlpError> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "loading adapter configuration");
        let contents = std::fs::read_to_string(path).map_err(|e| {
            LlpError::InvalidConfig(format!("reading {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), LlpError> {
        if self.buffer_capacity == 0 || self.buffer_capacity > MAX_BUFFER_CAPACITY {
            return Err(LlpError::InvalidConfig(format!(
                "buffer_capacity must be between 1 and {MAX_BUFFER_CAPACITY}, got {}",
                self.buffer_capacity
            )));
        }
        if self.socket_kind == SocketKind::Raw && self.protocol == 0 {
            return Err(LlpError::InvalidConfig(
                "raw sockets need a non-zero protocol number".to_string(),
            ));
        }
        Ok(())
    }
}
