//! Mock transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::traits::{Transport, TransportError, TransportKind};

/// Mock transport for driving the dispatcher without hardware.
///
/// Clones share the same queues, so a test can keep one handle while the
/// engine owns another.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    /// Queued inbound packets, one per read.
    rx_queue: VecDeque<Vec<u8>>,
    /// Captured writes.
    write_log: Vec<Vec<u8>>,
    /// Link started with this kind, if any.
    started: Option<TransportKind>,
    resets: usize,
    disconnected: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue raw bytes to be returned by the next read.
    pub fn queue_packet(&self, bytes: &[u8]) {
        self.state().rx_queue.push_back(bytes.to_vec());
    }

    /// Number of packets not yet read.
    pub fn pending(&self) -> usize {
        self.state().rx_queue.len()
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.state().write_log.clone()
    }

    /// Remove and return the captured writes.
    pub fn take_writes(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.state().write_log)
    }

    /// Simulate a dropped link.
    pub fn disconnect(&self) {
        self.state().disconnected = true;
    }

    /// Simulate the link coming back.
    pub fn reconnect(&self) {
        self.state().disconnected = false;
    }

    /// Kind passed to the last `start`, cleared by `stop`.
    pub fn started(&self) -> Option<TransportKind> {
        self.state().started
    }

    pub fn reset_count(&self) -> usize {
        self.state().resets
    }
}

impl Transport for MockTransport {
    fn start(&mut self, kind: TransportKind) {
        self.state().started = Some(kind);
    }

    fn stop(&mut self) {
        self.state().started = None;
    }

    fn reset(&mut self) {
        let mut state = self.state();
        state.rx_queue.clear();
        state.resets += 1;
    }

    fn read(&mut self, buffer: &mut [u8], timeout_ms: u32) -> Result<usize, TransportError> {
        let mut state = self.state();
        if state.disconnected {
            return Err(TransportError::Disconnected);
        }
        let packet = state
            .rx_queue
            .pop_front()
            .ok_or(TransportError::Timeout { timeout_ms })?;
        let n = packet.len().min(buffer.len());
        buffer[..n].copy_from_slice(&packet[..n]);
        Ok(n)
    }

    fn write(&mut self, data: &[u8], _timeout_ms: u32) -> Result<usize, TransportError> {
        let mut state = self.state();
        if state.disconnected {
            return Err(TransportError::Disconnected);
        }
        state.write_log.push(data.to_vec());
        Ok(data.len())
    }
}
