//! In-memory transport implementation for testing

use std::io;
use std::net::SocketAddrV4;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use super::{DatagramTransport, Descriptor, Received};

// Synthetic descriptors live far above anything the OS hands out so they can
// never be confused with a real fd.
static NEXT_DESCRIPTOR: AtomicI32 = AtomicI32::new(1 << 24);

type Inbound = Result<(SocketAddrV4, Vec<u8>), io::ErrorKind>;

/// In-memory transport for testing
///
/// This transport uses channels instead of a socket. The test drives the
/// other end through an [`InMemoryPeer`]: it delivers datagrams (or receive
/// failures) to the transport and observes every datagram the transport
/// sends. When nothing has been delivered, `recv_from` returns `WouldBlock`
/// just like a non-blocking socket.
///
/// The descriptor is synthetic, so this transport only works with reactors
/// that do not hand descriptors to the OS, such as
/// [`ManualReactor`](crate::testing::ManualReactor).
///
/// # Examples
///
/// ```
/// use std::net::{Ipv4Addr, SocketAddrV4};
/// use llp::io::{DatagramTransport, InMemoryTransport};
///
/// let (transport, peer) = InMemoryTransport::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1));
///
/// let dest = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 1), 500);
/// transport.send_to(b"ping", dest)?;
/// assert_eq!(peer.try_sent(), Some((dest, b"ping".to_vec())));
/// # Ok::<(), std::io::Error>(())
/// ```
pub struct InMemoryTransport {
    descriptor: Descriptor,
    local: SocketAddrV4,
    inbound: Receiver<Inbound>,
    outbound: Sender<(SocketAddrV4, Vec<u8>)>,
    send_failures: Receiver<io::ErrorKind>,
    closed: Arc<AtomicBool>,
}

/// Test-side handle of an [`InMemoryTransport`]
#[derive(Clone)]
pub struct InMemoryPeer {
    inbound: Sender<Inbound>,
    outbound: Receiver<(SocketAddrV4, Vec<u8>)>,
    send_failures: Sender<io::ErrorKind>,
    closed: Arc<AtomicBool>,
}

impl InMemoryTransport {
    /// Create a transport "bound" to `local` along with its peer handle.
    pub fn bind(local: SocketAddrV4) -> (Self, InMemoryPeer) {
        let (inbound_tx, inbound_rx) = crossbeam_channel::unbounded();
        let (outbound_tx, outbound_rx) = crossbeam_channel::unbounded();
        let (failure_tx, failure_rx) = crossbeam_channel::unbounded();
        let closed = Arc::new(AtomicBool::new(false));

        let fd: RawFd = NEXT_DESCRIPTOR.fetch_add(1, Ordering::Relaxed);
        let transport = Self {
            descriptor: Descriptor(fd),
            local,
            inbound: inbound_rx,
            outbound: outbound_tx,
            send_failures: failure_rx,
            closed: Arc::clone(&closed),
        };
        let peer = InMemoryPeer {
            inbound: inbound_tx,
            outbound: outbound_rx,
            send_failures: failure_tx,
            closed,
        };
        (transport, peer)
    }
}

impl DatagramTransport for InMemoryTransport {
    fn descriptor(&self) -> Descriptor {
        self.descriptor
    }

    fn local_addr(&self) -> SocketAddrV4 {
        self.local
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<Received> {
        match self.inbound.try_recv() {
            Ok(Ok((peer, data))) => {
                let len = std::cmp::min(data.len(), buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok(Received {
                    len,
                    peer,
                    truncated: data.len() > buf.len(),
                })
            }
            Ok(Err(kind)) => Err(io::Error::new(kind, "injected receive failure")),
            Err(TryRecvError::Empty) => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "no datagram available",
            )),
            Err(TryRecvError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "peer dropped",
            )),
        }
    }

    fn send_to(&self, buf: &[u8], peer: SocketAddrV4) -> io::Result<usize> {
        if let Ok(kind) = self.send_failures.try_recv() {
            return Err(io::Error::new(kind, "injected send failure"));
        }
        self.outbound
            .send((peer, buf.to_vec()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer dropped"))?;
        Ok(buf.len())
    }
}

impl Drop for InMemoryTransport {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl InMemoryPeer {
    /// Queue a datagram from `from` for the transport to receive.
    pub fn deliver(&self, from: SocketAddrV4, data: &[u8]) {
        let _ = self.inbound.send(Ok((from, data.to_vec())));
    }

    /// Make the next receive fail with `kind`.
    pub fn fail_next_receive(&self, kind: io::ErrorKind) {
        let _ = self.inbound.send(Err(kind));
    }

    /// Make the next send fail with `kind`.
    pub fn fail_next_send(&self, kind: io::ErrorKind) {
        let _ = self.send_failures.send(kind);
    }

    /// Next datagram the transport sent, if any.
    pub fn try_sent(&self) -> Option<(SocketAddrV4, Vec<u8>)> {
        self.outbound.try_recv().ok()
    }

    /// Every datagram sent so far that has not been taken yet.
    pub fn drain_sent(&self) -> Vec<(SocketAddrV4, Vec<u8>)> {
        self.outbound.try_iter().collect()
    }

    /// Whether the transport has been dropped (closed).
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
