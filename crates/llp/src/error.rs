//! Error types for the LLP adapter.

use std::io;
use std::net::SocketAddrV4;

/// How the caller should treat an [`LlpError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The adapter cannot fulfil its contract at all. Startup code is expected
    /// to terminate the process.
    Fatal,
    /// The adapter is still usable (or the failure only affected one
    /// datagram).
    Recoverable,
}

/// Errors reported by the adapter and its transports.
#[derive(Debug, thiserror::Error)]
pub enum LlpError {
    /// The local address text could not be parsed as an IPv4 address.
    #[error("invalid local address {0:?}")]
    InvalidAddress(String),

    /// The adapter configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The socket could not be created.
    #[error("creating socket")]
    CreateSocket(#[source] io::Error),

    /// The socket could not be bound to the local address.
    #[error("binding socket to {addr}")]
    Bind {
        addr: SocketAddrV4,
        #[source]
        source: io::Error,
    },

    /// The reactor refused the readability subscription.
    #[error("subscribing to readability events")]
    Subscribe(#[source] io::Error),

    /// A single receive call failed.
    #[error("receiving datagram")]
    Receive(#[source] io::Error),

    /// A single send call failed.
    #[error("sending datagram to {peer}")]
    Send {
        peer: SocketAddrV4,
        #[source]
        source: io::Error,
    },

    /// The adapter has been destroyed.
    #[error("adapter closed")]
    Closed,
}

impl LlpError {
    pub fn severity(&self) -> Severity {
        match self {
            LlpError::InvalidAddress(_)
            | LlpError::InvalidConfig(_)
            | LlpError::CreateSocket(_)
            | LlpError::Bind { .. }
            | LlpError::Subscribe(_) => Severity::Fatal,
            LlpError::Receive(_) | LlpError::Send { .. } | LlpError::Closed => {
                Severity::Recoverable
            }
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, LlpError::Closed)
    }

    /// Returns true for a receive that failed only because no datagram was
    /// queued (a spurious readability notification).
    pub fn is_would_block(&self) -> bool {
        matches!(self, LlpError::Receive(e) if e.kind() == io::ErrorKind::WouldBlock)
    }
}
