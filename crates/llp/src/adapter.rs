use std::fmt;
use std::io;
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde::Serialize;

use crate::address::LocalAddr;
use crate::config::LlpConfig;
use crate::engine::{EngineHandle, LowerLayer, ProtocolEngine, peer_address};
use crate::io::{DatagramTransport, SocketTransport};
use crate::reactor::{EventSubscription, Interest, ReadableCallback, SubscriptionId};
use crate::{LlpError, with_lock};

/// Outcome of one inbound notification that produced a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataIndication {
    /// Bytes forwarded to the engine.
    pub len: usize,
    pub peer: SocketAddrV4,
    /// The datagram did not fit the receive buffer; only the first `len`
    /// bytes were forwarded.
    pub truncated: bool,
    /// The engine was still alive and returned success.
    pub accepted: bool,
}

/// Snapshot of an adapter's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AdapterStats {
    pub datagrams_received: u64,
    pub bytes_received: u64,
    pub datagrams_truncated: u64,
    pub receive_errors: u64,
    pub engine_errors: u64,
    pub datagrams_sent: u64,
    pub bytes_sent: u64,
    pub send_errors: u64,
}

#[derive(Default)]
struct Counters {
    datagrams_received: AtomicU64,
    bytes_received: AtomicU64,
    datagrams_truncated: AtomicU64,
    receive_errors: AtomicU64,
    engine_errors: AtomicU64,
    datagrams_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn snapshot(&self) -> AdapterStats {
        AdapterStats {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            datagrams_truncated: self.datagrams_truncated.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            engine_errors: self.engine_errors.load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}

/// The socket and its readability subscription. They exist together or not
/// at all.
struct Binding {
    transport: Arc<dyn DatagramTransport>,
    subscription: SubscriptionId,
}

struct AdapterInner {
    // the caller owns the engine; an engine may hold adapter clones
    engine: Weak<dyn ProtocolEngine>,
    reactor: Arc<dyn EventSubscription>,
    local: SocketAddrV4,
    capacity: usize,

    // None once destroyed
    state: Mutex<Option<Binding>>,
    // the single receive buffer; held for the whole receive + forward
    buffer: Mutex<Vec<u8>>,
    counters: Counters,
}

/// LLP adapter handle
///
/// Cheap to clone; every clone refers to the same socket. The socket is
/// closed by [`LlpAdapter::destroy`] or when the last clone is dropped.
///
/// The adapter only keeps a weak reference to its engine, so an engine may
/// hold a clone of the adapter (usually as a [`LowerLayer`]) for its
/// outbound path. Keep the [`EngineHandle`] alive for as long as inbound
/// datagrams should be delivered; once it is gone they are received and
/// discarded.
#[derive(Clone)]
pub struct LlpAdapter {
    inner: Arc<AdapterInner>,
}

impl LlpAdapter {
    /// Open a socket on `local` as described by `config` and subscribe it to
    /// `reactor`.
    ///
    /// Every error returned here is a configuration error
    /// ([`LlpError::is_fatal`]); nothing is left open when it fails.
    #[tracing::instrument(skip_all, level = "debug")]
    pub fn initialize(
        engine: EngineHandle,
        local: impl Into<LocalAddr>,
        reactor: Arc<dyn EventSubscription>,
        config: &LlpConfig,
    ) -> Result<Self, LlpError> {
        let local = local.into();
        tracing::debug!(%local, kind = ?config.socket_kind, protocol = config.protocol, "initializing adapter");
        config.validate()?;
        let transport = SocketTransport::open(config, local.ip())?;
        Self::with_transport(engine, transport, reactor, config)
    }

    /// Build an adapter around an already bound transport.
    ///
    /// Use this for transports other than [`SocketTransport`], such as
    /// [`InMemoryTransport`](crate::io::InMemoryTransport) in tests. Only the
    /// buffer capacity is taken from `config`.
    pub fn with_transport<T>(
        engine: EngineHandle,
        transport: T,
        reactor: Arc<dyn EventSubscription>,
        config: &LlpConfig,
    ) -> Result<Self, LlpError>
    where
        T: DatagramTransport,
    {
        config.validate()?;
        let transport: Arc<dyn DatagramTransport> = Arc::new(transport);
        let local = transport.local_addr();
        let descriptor = transport.descriptor();

        let inner = Arc::new(AdapterInner {
            engine: Arc::downgrade(&engine),
            reactor: Arc::clone(&reactor),
            local,
            capacity: config.buffer_capacity,
            state: Mutex::new(None),
            buffer: Mutex::new(vec![0; config.buffer_capacity]),
            counters: Counters::default(),
        });

        let weak = Arc::downgrade(&inner);
        let callback: ReadableCallback = Arc::new(move || {
            // errors are logged where they are detected
            if let Some(inner) = weak.upgrade() {
                let _ = inner.on_readable();
            }
        });

        // hold the state lock so a notification racing with subscribe waits
        // for the binding instead of seeing a closed adapter
        with_lock("LlpAdapter.state", &inner.state, |mut state| {
            let subscription = reactor
                .subscribe(descriptor, Interest::READABLE | Interest::PERSIST, callback)
                .map_err(|e| {
                    tracing::error!(error = %e, %descriptor, "subscribing to readability events");
                    LlpError::Subscribe(e)
                })?;
            *state = Some(Binding {
                transport,
                subscription,
            });
            tracing::debug!(%local, %descriptor, %subscription, "adapter initialized");
            Ok::<(), LlpError>(())
        })?;

        Ok(Self { inner })
    }

    /// Send `data` to `peer_addr:peer_port`.
    ///
    /// `peer_addr` is the numeric address value with the first octet most
    /// significant (`0xC0A80101` is 192.168.1.1).
    pub fn data_request(
        &self,
        data: &[u8],
        peer_addr: u32,
        peer_port: u16,
    ) -> Result<usize, LlpError> {
        self.send_to(data, peer_address(peer_addr, peer_port))
    }

    /// Send `data` to `peer` as a single datagram.
    pub fn send_to(&self, data: &[u8], peer: SocketAddrV4) -> Result<usize, LlpError> {
        let inner = &self.inner;
        let transport = inner.transport().inspect_err(|_| {
            tracing::warn!(local = %inner.local, %peer, "data request on a closed adapter");
        })?;

        match transport.send_to(data, peer) {
            Ok(sent) => {
                if sent != data.len() {
                    tracing::warn!(sent, len = data.len(), %peer, "datagram partially sent");
                }
                tracing::debug!(local = %inner.local, len = sent, %peer, "sent datagram");
                Counters::bump(&inner.counters.datagrams_sent, 1);
                Counters::bump(&inner.counters.bytes_sent, sent as u64);
                Ok(sent)
            }
            Err(e) => {
                tracing::error!(local = %inner.local, error = %e, %peer, "sending datagram");
                Counters::bump(&inner.counters.send_errors, 1);
                Err(LlpError::Send { peer, source: e })
            }
        }
    }

    /// Handle one readability notification: receive a single datagram and
    /// forward it to the engine.
    ///
    /// The reactor calls this through the subscription; it is public so
    /// custom dispatch loops can drive the adapter directly.
    pub fn on_readable(&self) -> Result<DataIndication, LlpError> {
        self.inner.on_readable()
    }

    /// Unsubscribe from the reactor, then close the socket.
    ///
    /// Returns [`LlpError::Closed`] if the adapter was already destroyed.
    #[tracing::instrument(skip(self), fields(local = %self.inner.local), level = "debug")]
    pub fn destroy(&self) -> Result<(), LlpError> {
        let binding = with_lock("LlpAdapter.state", &self.inner.state, |mut state| {
            state.take()
        })
        .ok_or(LlpError::Closed)?;
        self.inner.teardown(binding);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        with_lock("LlpAdapter.state", &self.inner.state, |state| {
            state.is_none()
        })
    }

    /// Address the socket is bound to. Still available after destroy.
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.inner.local
    }

    pub fn buffer_capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn stats(&self) -> AdapterStats {
        self.inner.counters.snapshot()
    }
}

impl LowerLayer for LlpAdapter {
    fn data_request(
        &self,
        data: &[u8],
        peer_addr: u32,
        peer_port: u16,
    ) -> Result<usize, LlpError> {
        LlpAdapter::data_request(self, data, peer_addr, peer_port)
    }
}

impl fmt::Debug for LlpAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlpAdapter")
            .field("local", &self.inner.local)
            .field("capacity", &self.inner.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl AdapterInner {
    fn transport(&self) -> Result<Arc<dyn DatagramTransport>, LlpError> {
        with_lock("LlpAdapter.state", &self.state, |state| {
            state
                .as_ref()
                .map(|binding| Arc::clone(&binding.transport))
                .ok_or(LlpError::Closed)
        })
    }

    fn on_readable(&self) -> Result<DataIndication, LlpError> {
        let transport = self.transport().inspect_err(|_| {
            tracing::warn!(local = %self.local, "readability notification for a closed adapter");
        })?;

        // the state lock is released before the engine runs, so the engine
        // may issue data requests on this adapter
        with_lock("LlpAdapter.buffer", &self.buffer, |mut buffer| {
            let received = match transport.recv_from(buffer.as_mut_slice()) {
                Ok(received) => received,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    tracing::debug!(local = %self.local, "spurious readability notification");
                    return Err(LlpError::Receive(e));
                }
                Err(e) => {
                    tracing::error!(local = %self.local, error = %e, "receiving datagram");
                    Counters::bump(&self.counters.receive_errors, 1);
                    return Err(LlpError::Receive(e));
                }
            };

            tracing::debug!(
                local = %self.local,
                len = received.len,
                peer = %received.peer,
                "received datagram"
            );
            Counters::bump(&self.counters.datagrams_received, 1);
            Counters::bump(&self.counters.bytes_received, received.len as u64);
            if received.truncated {
                tracing::warn!(
                    local = %self.local,
                    capacity = self.capacity,
                    peer = %received.peer,
                    "datagram truncated to buffer capacity"
                );
                Counters::bump(&self.counters.datagrams_truncated, 1);
            }

            let Some(engine) = self.engine.upgrade() else {
                tracing::warn!(local = %self.local, len = received.len, "protocol engine dropped, discarding datagram");
                Counters::bump(&self.counters.engine_errors, 1);
                return Ok(DataIndication {
                    len: received.len,
                    peer: received.peer,
                    truncated: received.truncated,
                    accepted: false,
                });
            };

            let accepted = match engine.process_inbound_data(&buffer[..received.len]) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(local = %self.local, error = %e, "engine rejected inbound datagram");
                    Counters::bump(&self.counters.engine_errors, 1);
                    false
                }
            };

            Ok(DataIndication {
                len: received.len,
                peer: received.peer,
                truncated: received.truncated,
                accepted,
            })
        })
    }

    fn teardown(&self, binding: Binding) {
        if let Err(e) = self.reactor.unsubscribe(binding.subscription) {
            tracing::warn!(
                local = %self.local,
                error = %e,
                subscription = %binding.subscription,
                "unsubscribing before close"
            );
        }
        // closes the socket once any in-flight send lets go of it
        drop(binding.transport);
        tracing::debug!(local = %self.local, "adapter closed");
    }
}

impl Drop for AdapterInner {
    fn drop(&mut self) {
        let binding = self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(binding) = binding {
            tracing::debug!(local = %self.local, "last adapter handle dropped");
            self.teardown(binding);
        }
    }
}
