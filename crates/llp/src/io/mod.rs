//! IO abstraction layer for the LLP adapter
//!
//! The adapter never talks to a socket directly. It owns a boxed
//! [`DatagramTransport`], which allows plugging in different implementations:
//! an OS socket ([`SocketTransport`]) for production and channels
//! ([`InMemoryTransport`]) for tests that must not need network privileges.
//!
//! # Examples
//!
//! ## Using a UDP socket
//!
//! ```no_run
//! use std::net::Ipv4Addr;
//! use llp::config::LlpConfig;
//! use llp::io::{DatagramTransport, SocketTransport};
//!
//! let transport = SocketTransport::open(&LlpConfig::datagram(0), Ipv4Addr::LOCALHOST)?;
//! println!("bound to {}", transport.local_addr());
//! # Ok::<(), llp::LlpError>(())
//! ```
//!
//! ## Using the in-memory transport for testing
//!
//! ```
//! use std::net::{Ipv4Addr, SocketAddrV4};
//! use llp::io::{DatagramTransport, InMemoryTransport};
//!
//! let local = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 4000);
//! let (transport, peer) = InMemoryTransport::bind(local);
//!
//! let from = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 9000);
//! peer.deliver(from, b"hello");
//!
//! let mut buf = [0u8; 16];
//! let received = transport.recv_from(&mut buf)?;
//! assert_eq!(&buf[..received.len], b"hello");
//! assert_eq!(received.peer, from);
//! # Ok::<(), std::io::Error>(())
//! ```

use std::fmt;
use std::io;
use std::net::SocketAddrV4;
use std::os::fd::RawFd;

mod memory;
mod socket;

#[cfg(test)]
mod tests;

pub use memory::{InMemoryPeer, InMemoryTransport};
pub use socket::SocketTransport;

/// Identifies the OS resource a reactor watches for readability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor(pub RawFd);

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd{}", self.0)
    }
}

/// Result of a single receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    /// Number of bytes written into the buffer.
    pub len: usize,
    /// Sender of the datagram. Raw sockets report port 0.
    pub peer: SocketAddrV4,
    /// The datagram was longer than the buffer and its tail was discarded.
    pub truncated: bool,
}

/// A bound, connectionless, message-oriented transport.
///
/// # Requirements
///
/// - Each `recv_from` consumes exactly one datagram, truncating it to the
///   buffer length and reporting that through [`Received::truncated`]
/// - `recv_from` must not block: when nothing is queued it returns
///   [`io::ErrorKind::WouldBlock`]
/// - Each `send_to` transmits exactly one datagram
/// - Dropping the transport closes the underlying resource
///
/// Methods take `&self` so the outbound path can run while another thread is
/// parked in the inbound path.
pub trait DatagramTransport: Send + Sync + 'static {
    /// The descriptor a reactor should watch.
    fn descriptor(&self) -> Descriptor;

    /// The address the transport is bound to.
    fn local_addr(&self) -> SocketAddrV4;

    /// Receive one datagram into `buf`.
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<Received>;

    /// Send one datagram to `peer`, returning the number of bytes sent.
    fn send_to(&self, buf: &[u8], peer: SocketAddrV4) -> io::Result<usize>;
}
