//! Scripted in-memory transport for tests.
//!
//! [`MockTransport`] stands in for a device: tests push inbound chunks, the
//! port drains them through the normal read pipeline, and every outbound
//! write is recorded for inspection. Blocking behaves like hardware:
//! reads wait for data up to their timeout, and a pending issued read
//! completes as soon as a chunk arrives.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use super::{CompletedTransfer, TransferError, TransferKind, UsbTransport};
use crate::buffer::TransferBuffer;

/// Wake-up slice for waits that have no deadline of their own.
const WAIT_SLICE: Duration = Duration::from_millis(50);

#[derive(Default)]
struct MockState {
    /// Chunks waiting to be "received" from the device.
    inbound: VecDeque<Vec<u8>>,
    /// Every chunk written to an OUT endpoint, in order.
    written: Vec<(u8, Vec<u8>)>,
    /// The issued-but-not-completed inbound transfer, if any.
    pending: Option<PendingRead>,
    /// Completions for unrelated endpoints, delivered before data.
    stray_completions: VecDeque<CompletedTransfer>,
    /// One-shot error injected into the next read path call.
    next_read_error: Option<TransferError>,
    /// One-shot error injected into the next write.
    next_write_error: Option<TransferError>,
    /// One-shot cancellation flag.
    cancelled: bool,
    /// Number of `submit_read` calls observed.
    submits: usize,
}

struct PendingRead {
    endpoint: u8,
    window: Arc<TransferBuffer>,
    max_len: usize,
}

/// In-memory [`UsbTransport`] with scripted inbound data.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
    cond: Condvar,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script one inbound chunk, waking any blocked reader.
    pub fn push_inbound(&self, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.inbound.push_back(data.to_vec());
        self.cond.notify_all();
    }

    /// Script a completion on an unrelated endpoint. The read worker is
    /// expected to ignore it.
    pub fn push_completion(&self, endpoint: u8, kind: TransferKind) {
        let mut state = self.state.lock().unwrap();
        state.stray_completions.push_back(CompletedTransfer { endpoint, kind });
        self.cond.notify_all();
    }

    /// Fail the next read-path call (`bulk_read` or `wait_completed`) with
    /// the given error.
    pub fn fail_next_read(&self, err: TransferError) {
        let mut state = self.state.lock().unwrap();
        state.next_read_error = Some(err);
        self.cond.notify_all();
    }

    /// Fail the next `bulk_write` with the given error.
    pub fn fail_next_write(&self, err: TransferError) {
        self.state.lock().unwrap().next_write_error = Some(err);
    }

    /// Chunks written so far, as (endpoint, bytes) pairs in wire order.
    pub fn written(&self) -> Vec<(u8, Vec<u8>)> {
        self.state.lock().unwrap().written.clone()
    }

    /// All bytes written so far, concatenated in wire order.
    pub fn written_bytes(&self) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        state
            .written
            .iter()
            .flat_map(|(_, chunk)| chunk.iter().copied())
            .collect()
    }

    /// Sizes of the individual outbound transfers, in wire order.
    pub fn written_chunk_sizes(&self) -> Vec<usize> {
        let state = self.state.lock().unwrap();
        state.written.iter().map(|(_, chunk)| chunk.len()).collect()
    }

    /// How many inbound transfers have been issued.
    pub fn submitted_reads(&self) -> usize {
        self.state.lock().unwrap().submits
    }

    /// Whether an issued inbound transfer is currently pending.
    pub fn has_pending_read(&self) -> bool {
        self.state.lock().unwrap().pending.is_some()
    }
}

impl UsbTransport for MockTransport {
    fn submit_read(
        &self,
        endpoint: u8,
        window: Arc<TransferBuffer>,
        max_len: usize,
    ) -> Result<(), TransferError> {
        let mut state = self.state.lock().unwrap();
        state.submits += 1;
        state.pending = Some(PendingRead {
            endpoint,
            window,
            max_len,
        });
        self.cond.notify_all();
        Ok(())
    }

    fn wait_completed(&self) -> Result<CompletedTransfer, TransferError> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.cancelled {
                state.cancelled = false;
                return Err(TransferError::Cancelled);
            }
            if let Some(err) = state.next_read_error.take() {
                return Err(err);
            }
            if let Some(stray) = state.stray_completions.pop_front() {
                return Ok(stray);
            }
            if state.pending.is_some() && !state.inbound.is_empty() {
                let chunk = state.inbound.pop_front().unwrap();
                let pending = state.pending.take().unwrap();
                // Fill the window without holding the mock lock.
                drop(state);

                pending.window.fill_read_window(|buf| {
                    let n = chunk.len().min(pending.max_len).min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    n
                });
                return Ok(CompletedTransfer {
                    endpoint: pending.endpoint,
                    kind: TransferKind::Bulk,
                });
            }

            let (guard, _) = self.cond.wait_timeout(state, WAIT_SLICE).unwrap();
            state = guard;
        }
    }

    fn bulk_read(
        &self,
        _endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransferError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(err) = state.next_read_error.take() {
                return Err(err);
            }
            if let Some(chunk) = state.inbound.pop_front() {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                return Ok(n);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(TransferError::Timeout);
            }
            let (guard, _) = self.cond.wait_timeout(state, deadline - now).unwrap();
            state = guard;
        }
    }

    fn bulk_write(
        &self,
        endpoint: u8,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, TransferError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.next_write_error.take() {
            return Err(err);
        }
        state.written.push((endpoint, data.to_vec()));
        Ok(data.len())
    }

    fn cancel_wait(&self) {
        let mut state = self.state.lock().unwrap();
        state.cancelled = true;
        self.cond.notify_all();
    }
}
