//! Buffering between callers and the bulk endpoint pair.
//!
//! The [`TransferBuffer`] decouples the rate at which callers enqueue writes
//! (and the hardware completes reads) from the rate at which the worker
//! threads move data over the wire. It holds two independent pieces of state:
//!
//! - a blocking FIFO write queue drained by the write worker, and
//! - a single fixed-capacity read window that the in-flight inbound transfer
//!   writes into.
//!
//! The two live in separate lock domains; the write path never contends with
//! the read path.

use bytes::{Bytes, BytesMut};
use std::sync::{Condvar, Mutex};
use tracing::trace;

/// Upper bound on a single bulk transfer, and the capacity of the read
/// window. Larger enqueued writes are split across multiple transfers.
pub const MAX_TRANSFER_CHUNK: usize = 16 * 1024;

/// Write queue plus read window for one port.
pub struct TransferBuffer {
    write_queue: WriteQueue,
    read_window: Mutex<ReadWindow>,
}

/// Blocking producer/consumer queue of outbound bytes.
///
/// Chunks are coalesced into one contiguous byte FIFO, so a dequeue may span
/// several enqueues but never splits or reorders bytes.
struct WriteQueue {
    state: Mutex<WriteQueueState>,
    available: Condvar,
}

struct WriteQueueState {
    pending: BytesMut,
    /// One-shot interruption flag, observed and consumed only by a consumer
    /// blocked on an empty queue.
    interrupted: bool,
}

/// Landing region for the in-flight inbound transfer. `position` counts the
/// bytes the transport has written since the window was last drained.
struct ReadWindow {
    buf: Box<[u8]>,
    position: usize,
}

impl TransferBuffer {
    pub fn new() -> Self {
        Self {
            write_queue: WriteQueue {
                state: Mutex::new(WriteQueueState {
                    pending: BytesMut::new(),
                    interrupted: false,
                }),
                available: Condvar::new(),
            },
            read_window: Mutex::new(ReadWindow {
                buf: vec![0u8; MAX_TRANSFER_CHUNK].into_boxed_slice(),
                position: 0,
            }),
        }
    }

    /// Append a chunk to the write queue and wake one blocked consumer.
    ///
    /// Never blocks. Empty input is a no-op and wakes nobody.
    pub fn enqueue_write(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        let mut state = self.write_queue.state.lock().unwrap();
        state.pending.extend_from_slice(data);
        trace!(queued = state.pending.len(), "enqueued write chunk");
        self.write_queue.available.notify_one();
    }

    /// Take the next outbound chunk, blocking while the queue is empty.
    ///
    /// Returns at most [`MAX_TRANSFER_CHUNK`] bytes; anything beyond that
    /// stays queued for the next call. Returns `None` when the wait was
    /// interrupted via [`interrupt_writer`](Self::interrupt_writer), which is
    /// clean cancellation rather than an error.
    pub fn dequeue_write(&self) -> Option<Bytes> {
        let mut state = self.write_queue.state.lock().unwrap();
        while state.pending.is_empty() {
            if state.interrupted {
                state.interrupted = false;
                return None;
            }
            state = self.write_queue.available.wait(state).unwrap();
        }

        let take = state.pending.len().min(MAX_TRANSFER_CHUNK);
        Some(state.pending.split_to(take).freeze())
    }

    /// Wake a consumer blocked in [`dequeue_write`](Self::dequeue_write).
    ///
    /// The flag is one-shot: it is consumed by the first consumer that
    /// observes an empty queue. Queued data is never discarded and always
    /// takes priority over a pending interruption.
    pub fn interrupt_writer(&self) {
        let mut state = self.write_queue.state.lock().unwrap();
        state.interrupted = true;
        self.write_queue.available.notify_all();
    }

    /// Bytes currently queued for the write worker.
    pub fn queued_bytes(&self) -> usize {
        self.write_queue.state.lock().unwrap().pending.len()
    }

    /// Grant the transport exclusive access to the read window.
    ///
    /// The closure writes received bytes starting at offset 0 and returns how
    /// many it wrote; that count becomes the window cursor. Only the active
    /// inbound transfer may call this, so the window is never overwritten
    /// while it still holds undrained data.
    pub fn fill_read_window<F>(&self, fill: F) -> usize
    where
        F: FnOnce(&mut [u8]) -> usize,
    {
        let mut window = self.read_window.lock().unwrap();
        let written = fill(&mut window.buf).min(MAX_TRANSFER_CHUNK);
        window.position = written;
        written
    }

    /// Copy out exactly the bytes received since the window was last claimed
    /// and reset the cursor to 0.
    pub fn snapshot_and_clear(&self) -> Bytes {
        let mut window = self.read_window.lock().unwrap();
        let data = Bytes::copy_from_slice(&window.buf[..window.position]);
        window.position = 0;
        data
    }
}

impl Default for TransferBuffer {
    fn default() -> Self {
        Self::new()
    }
}
