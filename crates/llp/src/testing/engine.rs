//! Recording protocol engine for testing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::engine::ProtocolEngine;

/// Engine that records every datagram it is handed.
///
/// Datagrams go through a channel so a test thread can wait for them with
/// [`RecordingEngine::recv_timeout`] while another thread drives the
/// reactor.
pub struct RecordingEngine {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    reject: AtomicBool,
}

impl Default for RecordingEngine {
    fn default() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            reject: AtomicBool::new(false),
        }
    }
}

impl RecordingEngine {
    /// Record datagrams but report failure for each of them.
    pub fn rejecting() -> Self {
        let engine = Self::default();
        engine.set_reject(true);
        engine
    }

    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    /// Datagrams recorded since the last call, oldest first.
    pub fn received(&self) -> Vec<Vec<u8>> {
        self.rx.try_iter().collect()
    }

    /// Wait for the next recorded datagram.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Vec<u8>, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

impl ProtocolEngine for RecordingEngine {
    fn process_inbound_data(&self, data: &[u8]) -> eyre::Result<()> {
        let _ = self.tx.send(data.to_vec());
        if self.reject.load(Ordering::SeqCst) {
            eyre::bail!("rejected {} byte datagram", data.len());
        }
        Ok(())
    }
}
