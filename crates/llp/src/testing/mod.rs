//! Testing utilities for the adapter.
//!
//! This module provides doubles for the adapter's collaborators: a reactor
//! whose notifications are fired by hand and an engine that records every
//! datagram it is handed. Combined with
//! [`InMemoryTransport`](crate::io::InMemoryTransport) they exercise the
//! whole adapter without sockets or a poll loop.
//!
//! # Example
//!
//! ```
//! use std::net::{Ipv4Addr, SocketAddrV4};
//! use std::sync::Arc;
//! use llp::io::InMemoryTransport;
//! use llp::testing::{ManualReactor, RecordingEngine};
//! use llp::{LlpAdapter, LlpConfig};
//!
//! let reactor = Arc::new(ManualReactor::default());
//! let engine = Arc::new(RecordingEngine::default());
//! let (transport, peer) = InMemoryTransport::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1));
//!
//! let adapter = LlpAdapter::with_transport(
//!     engine.clone(),
//!     transport,
//!     reactor.clone(),
//!     &LlpConfig::default(),
//! )?;
//!
//! peer.deliver(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 9), 53), b"hello");
//! assert_eq!(reactor.fire_all(), 1);
//! assert_eq!(engine.received(), vec![b"hello".to_vec()]);
//! # drop(adapter);
//! # Ok::<(), llp::LlpError>(())
//! ```

mod engine;
mod reactor;

pub use engine::RecordingEngine;
pub use reactor::{ManualReactor, SubscriptionEvent};
