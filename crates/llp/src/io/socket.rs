//! Socket-based transport implementation

use std::io;
use std::mem::MaybeUninit;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::AsRawFd;

use socket2::{Domain, MaybeUninitSlice, Protocol, SockAddr, Socket, Type};

use super::{DatagramTransport, Descriptor, Received};
use crate::LlpError;
use crate::config::{LlpConfig, SocketKind};

/// IPv4 socket transport
///
/// Wraps a [`socket2::Socket`] of the configured kind:
///
/// - [`SocketKind::Raw`] opens `SOCK_RAW` for the configured protocol number.
///   Raw sockets have no ports, so the configured port is ignored, datagrams
///   are received with their IPv4 header, and creating one requires
///   `CAP_NET_RAW`.
/// - [`SocketKind::Datagram`] opens a UDP socket on the configured port.
///
/// The socket is switched to non-blocking mode so a receive after a
/// spurious readability notification returns `WouldBlock` instead of
/// stalling the reactor.
///
/// # Examples
///
/// ```no_run
/// use std::net::Ipv4Addr;
/// use llp::config::LlpConfig;
/// use llp::io::SocketTransport;
///
/// // needs CAP_NET_RAW
/// let transport = SocketTransport::open(&LlpConfig::raw(47), Ipv4Addr::new(10, 0, 0, 1))?;
/// # Ok::<(), llp::LlpError>(())
/// ```
#[derive(Debug)]
pub struct SocketTransport {
    socket: Socket,
    local: SocketAddrV4,
}

impl SocketTransport {
    /// Create a socket for `config` and bind it to `local`.
    ///
    /// # Errors
    ///
    /// Returns [`LlpError::CreateSocket`] if the socket cannot be created or
    /// configured, and [`LlpError::Bind`] if binding fails. Either way the
    /// socket is closed before returning.
    #[tracing::instrument(level = "debug", skip(config), fields(kind = ?config.socket_kind))]
    pub fn open(config: &LlpConfig, local: Ipv4Addr) -> Result<Self, LlpError> {
        let (ty, protocol, port) = match config.socket_kind {
            SocketKind::Raw => (
                Type::RAW,
                Protocol::from(i32::from(config.protocol)),
                0,
            ),
            SocketKind::Datagram => (Type::DGRAM, Protocol::UDP, config.local_port),
        };

        let socket = Socket::new(Domain::IPV4, ty, Some(protocol)).map_err(|e| {
            tracing::error!(error = %e, "creating socket");
            LlpError::CreateSocket(e)
        })?;
        socket.set_nonblocking(true).map_err(|e| {
            tracing::error!(error = %e, "switching socket to non-blocking mode");
            LlpError::CreateSocket(e)
        })?;

        let addr = SocketAddrV4::new(local, port);
        socket.bind(&SockAddr::from(addr)).map_err(|e| {
            tracing::error!(error = %e, %addr, "binding socket");
            LlpError::Bind { addr, source: e }
        })?;

        // pick up the port the kernel chose for ephemeral datagram sockets
        let local = socket
            .local_addr()
            .ok()
            .and_then(|a| a.as_socket_ipv4())
            .unwrap_or(addr);
        tracing::debug!(fd = socket.as_raw_fd(), %local, "socket bound");

        Ok(Self { socket, local })
    }
}

impl DatagramTransport for SocketTransport {
    fn descriptor(&self) -> Descriptor {
        Descriptor(self.socket.as_raw_fd())
    }

    fn local_addr(&self) -> SocketAddrV4 {
        self.local
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<Received> {
        // SAFETY: `u8` and `MaybeUninit<u8>` share a layout, and the kernel
        // only ever writes initialised bytes into the slice.
        let uninit = unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) };
        let mut bufs = [MaybeUninitSlice::new(uninit)];
        let (len, flags, addr) = self.socket.recv_from_vectored(&mut bufs)?;

        let peer = addr.as_socket_ipv4().unwrap_or_else(|| {
            tracing::warn!(?addr, "datagram from a non-IPv4 address");
            SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)
        });

        Ok(Received {
            len,
            peer,
            truncated: flags.is_truncated(),
        })
    }

    fn send_to(&self, buf: &[u8], peer: SocketAddrV4) -> io::Result<usize> {
        self.socket.send_to(buf, &SockAddr::from(peer))
    }
}
