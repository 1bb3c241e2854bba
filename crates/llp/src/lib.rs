//! Lower-layer protocol adapter
//!
//! This crate binds a socket to an event reactor and an upstream protocol
//! engine:
//!
//! - inbound: the reactor reports the socket readable, the adapter receives
//!   one datagram into its single buffer and hands the bytes to the
//!   [`ProtocolEngine`]
//! - outbound: the engine (or anything holding the adapter handle) calls
//!   [`LlpAdapter::data_request`] and the adapter sends one datagram
//!
//! The engine, the reactor and the transport are all injected, so the
//! adapter can be exercised without sockets (see [`io::InMemoryTransport`]
//! and [`testing::ManualReactor`]).
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use llp::{LlpAdapter, LlpConfig, reactor::PollReactor};
//!
//! let reactor = Arc::new(PollReactor::new()?);
//! let engine = Arc::new(|data: &[u8]| -> eyre::Result<()> {
//!     println!("got {} bytes", data.len());
//!     Ok(())
//! });
//!
//! let adapter = LlpAdapter::initialize(
//!     engine.clone(),
//!     "127.0.0.1".parse::<llp::LocalAddr>()?,
//!     reactor.clone(),
//!     &LlpConfig::datagram(4500),
//! )?;
//!
//! adapter.data_request(b"ping", 0x7F00_0001, 4501)?;
//! reactor.turn(Some(Duration::from_secs(1)))?;
//! adapter.destroy()?;
//! # Ok::<(), eyre::Report>(())
//! ```
use std::sync::{Mutex, MutexGuard, PoisonError};

mod adapter;
mod address;
pub mod config;
pub mod engine;
mod error;
pub mod io;
pub mod reactor;
pub mod testing;

pub use adapter::{AdapterStats, DataIndication, LlpAdapter};
pub use address::LocalAddr;
pub use config::{DEFAULT_BUFFER_CAPACITY, DEFAULT_PROTOCOL, LlpConfig, SocketKind};
pub use engine::{EngineHandle, LowerLayer, ProtocolEngine};
pub use error::{LlpError, Severity};

pub(crate) fn with_lock<T, F, R>(name: &str, lock: &Mutex<T>, f: F) -> R
where
    F: FnOnce(MutexGuard<'_, T>) -> R,
{
    tracing::trace!(%name, "taking lock");
    let inner = lock.lock().unwrap_or_else(PoisonError::into_inner);
    let res = f(inner);
    tracing::trace!(%name, "releasing lock");
    res
}
