//! Upper-layer contracts
//!
//! [`ProtocolEngine`] is what the adapter forwards inbound datagrams to.
//! [`LowerLayer`] is what an engine holds to push datagrams back out; the
//! adapter handle implements it.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use crate::LlpError;

/// Consumer of inbound datagrams.
///
/// The adapter calls `process_inbound_data` synchronously from the reactor's
/// dispatch turn, once per received datagram, with exactly the bytes that
/// were received. An error is logged by the adapter and otherwise ignored.
///
/// Closures implement this trait:
///
/// ```
/// use llp::ProtocolEngine;
///
/// let engine = |data: &[u8]| -> eyre::Result<()> {
///     println!("{} bytes", data.len());
///     Ok(())
/// };
/// engine.process_inbound_data(b"abc").unwrap();
/// ```
pub trait ProtocolEngine: Send + Sync {
    fn process_inbound_data(&self, data: &[u8]) -> eyre::Result<()>;
}

impl<F> ProtocolEngine for F
where
    F: Fn(&[u8]) -> eyre::Result<()> + Send + Sync,
{
    fn process_inbound_data(&self, data: &[u8]) -> eyre::Result<()> {
        self(data)
    }
}

/// Handle to the engine an adapter forwards to.
///
/// The adapter downgrades it on initialization; the caller keeps the engine
/// alive.
pub type EngineHandle = Arc<dyn ProtocolEngine>;

/// Outbound half of the adapter as seen by an engine.
pub trait LowerLayer: Send + Sync {
    /// Transmit one datagram to `peer_addr:peer_port`.
    ///
    /// `peer_addr` is the numeric value of the IPv4 address with the first
    /// octet most significant, so `0xC0A80101` is 192.168.1.1.
    fn data_request(&self, data: &[u8], peer_addr: u32, peer_port: u16)
    -> Result<usize, LlpError>;
}

/// Build the destination for a data request.
pub fn peer_address(peer_addr: u32, peer_port: u16) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::from(peer_addr), peer_port)
}
