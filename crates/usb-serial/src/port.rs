//! The serial port façade.
//!
//! A [`SerialPort`] turns a bulk endpoint pair into a byte stream in one of
//! two modes, fixed for the life of the instance:
//!
//! - **Async**: two background workers pump data. The write worker drains
//!   the buffer's write queue onto the OUT endpoint; the read worker keeps
//!   exactly one inbound transfer in flight and pushes completed chunks to
//!   the registered callback.
//! - **Sync**: no workers; [`sync_read`](SerialPort::sync_read) and
//!   [`sync_write`](SerialPort::sync_write) perform one blocking transfer
//!   each on the caller's thread.
//!
//! Calling a primitive of the other mode fails fast with
//! [`Error::WrongMode`] instead of silently mixing paths.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, trace, warn};

use crate::buffer::{TransferBuffer, MAX_TRANSFER_CHUNK};
use crate::error::{Error, Result};
use crate::transport::{TransferError, TransferKind, UsbTransport};
use crate::worker::Worker;

/// Default bound on a single transfer issued by a worker or helper.
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(5);

/// Operating mode, selected at open time and never switched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortMode {
    /// Callback-driven background I/O.
    Async,
    /// Caller-driven blocking I/O.
    Sync,
}

/// Consumer of completed inbound chunks. Invoked on the read worker's
/// thread, not the registering thread.
pub type ReadCallback = Box<dyn FnMut(&[u8]) + Send>;

/// A byte-stream serial port over one USB device's bulk endpoint pair.
pub struct SerialPort<T: UsbTransport + 'static> {
    transport: Arc<T>,
    buffer: Arc<TransferBuffer>,
    callback: Arc<Mutex<Option<ReadCallback>>>,
    mode: PortMode,
    in_endpoint: u8,
    out_endpoint: u8,
    transfer_timeout: Duration,
    is_open: bool,
    /// Set once the first inbound transfer has been issued; guards the
    /// one-transfer-in-flight invariant against repeated `read` calls.
    primed: AtomicBool,
    read_worker: Option<Worker>,
    write_worker: Option<Worker>,
}

impl<T: UsbTransport + 'static> SerialPort<T> {
    /// Open the port in async mode and start both workers.
    ///
    /// Line settings are the configuration collaborator's business and must
    /// already be applied to the device.
    pub fn open(transport: T, in_endpoint: u8, out_endpoint: u8) -> Result<Self> {
        let mut port = Self::new(transport, PortMode::Async, in_endpoint, out_endpoint);
        port.start_write_worker()?;
        port.start_read_worker()?;
        port.is_open = true;
        info!(in_endpoint, out_endpoint, "serial port opened (async)");
        Ok(port)
    }

    /// Open the port in sync mode. No background workers exist.
    pub fn open_sync(transport: T, in_endpoint: u8, out_endpoint: u8) -> Result<Self> {
        let mut port = Self::new(transport, PortMode::Sync, in_endpoint, out_endpoint);
        port.is_open = true;
        info!(in_endpoint, out_endpoint, "serial port opened (sync)");
        Ok(port)
    }

    fn new(transport: T, mode: PortMode, in_endpoint: u8, out_endpoint: u8) -> Self {
        Self {
            transport: Arc::new(transport),
            buffer: Arc::new(TransferBuffer::new()),
            callback: Arc::new(Mutex::new(None)),
            mode,
            in_endpoint,
            out_endpoint,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            is_open: false,
            primed: AtomicBool::new(false),
            read_worker: None,
            write_worker: None,
        }
    }

    pub fn mode(&self) -> PortMode {
        self.mode
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn transfer_timeout(&self) -> Duration {
        self.transfer_timeout
    }

    /// Bound each worker-issued transfer. Running workers keep the timeout
    /// they were started with; [`restart_io`](Self::restart_io) picks up the
    /// new value.
    pub fn set_transfer_timeout(&mut self, timeout: Duration) {
        self.transfer_timeout = timeout;
    }

    /// Shared access to the transport, e.g. for a configuration collaborator.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Queue bytes for the write worker. Fire-and-forget: returns as soon as
    /// the chunk is enqueued, with no per-write completion signal.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        if self.mode != PortMode::Async {
            return Err(Error::WrongMode);
        }
        if !self.is_open {
            return Err(Error::PortClosed);
        }
        self.buffer.enqueue_write(data);
        Ok(())
    }

    /// Register (or replace) the read callback and start the inbound flow.
    ///
    /// The first call issues the initial inbound transfer; later calls only
    /// swap the callback, keeping a single transfer in flight. The callback
    /// runs on the read worker's thread and must not call back into methods
    /// that take `&mut self`.
    pub fn read<F>(&self, callback: F) -> Result<()>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        if self.mode != PortMode::Async {
            return Err(Error::WrongMode);
        }
        if !self.is_open {
            return Err(Error::PortClosed);
        }

        *self.callback.lock().unwrap() = Some(Box::new(callback));

        if !self.primed.swap(true, Ordering::AcqRel) {
            self.transport
                .submit_read(self.in_endpoint, self.buffer.clone(), MAX_TRANSFER_CHUNK)?;
        }
        Ok(())
    }

    /// One blocking inbound transfer into `buf`. Sync mode only.
    ///
    /// Empty buffers read nothing and return `Ok(0)`.
    pub fn sync_read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if self.mode != PortMode::Sync {
            return Err(Error::WrongMode);
        }
        if !self.is_open {
            return Err(Error::PortClosed);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        Ok(self.transport.bulk_read(self.in_endpoint, buf, timeout)?)
    }

    /// One blocking outbound transfer of `data`. Sync mode only.
    ///
    /// Empty input writes nothing and returns `Ok(0)`.
    pub fn sync_write(&self, data: &[u8], timeout: Duration) -> Result<usize> {
        if self.mode != PortMode::Sync {
            return Err(Error::WrongMode);
        }
        if !self.is_open {
            return Err(Error::PortClosed);
        }
        if data.is_empty() {
            return Ok(0);
        }
        Ok(self.transport.bulk_write(self.out_endpoint, data, timeout)?)
    }

    /// Quiesce and restart both workers, e.g. around device reconfiguration.
    ///
    /// The old workers are stopped and joined before their replacements
    /// start, so no two workers ever share a role. If the inbound flow was
    /// active it is re-primed with a fresh transfer.
    pub fn restart_io(&mut self) -> Result<()> {
        if self.mode != PortMode::Async {
            return Err(Error::WrongMode);
        }
        if !self.is_open {
            return Err(Error::PortClosed);
        }

        if let Some(mut worker) = self.read_worker.take() {
            worker.stop();
        }
        if let Some(mut worker) = self.write_worker.take() {
            worker.stop();
        }

        self.start_write_worker()?;
        self.start_read_worker()?;

        if self.primed.load(Ordering::Acquire) {
            self.transport
                .submit_read(self.in_endpoint, self.buffer.clone(), MAX_TRANSFER_CHUNK)?;
        }
        Ok(())
    }

    /// Stop both workers (joining their threads) and mark the port closed.
    /// Safe to call repeatedly; also runs on drop.
    pub fn close(&mut self) {
        if let Some(mut worker) = self.read_worker.take() {
            worker.stop();
        }
        if let Some(mut worker) = self.write_worker.take() {
            worker.stop();
        }
        *self.callback.lock().unwrap() = None;
        self.primed.store(false, Ordering::Release);

        if self.is_open {
            self.is_open = false;
            info!("serial port closed");
        }
    }

    /// Start the read worker unless one is already live for the role.
    fn start_read_worker(&mut self) -> Result<()> {
        if self.read_worker.as_ref().is_some_and(Worker::is_running) {
            return Ok(());
        }

        let transport = self.transport.clone();
        let buffer = self.buffer.clone();
        let callback = self.callback.clone();
        let in_endpoint = self.in_endpoint;

        let unblock_transport = self.transport.clone();
        let worker = Worker::spawn(
            "usb-serial-read",
            move || read_step(&transport, &buffer, &callback, in_endpoint),
            move || unblock_transport.cancel_wait(),
        )?;
        self.read_worker = Some(worker);
        Ok(())
    }

    /// Start the write worker unless one is already live for the role.
    fn start_write_worker(&mut self) -> Result<()> {
        if self.write_worker.as_ref().is_some_and(Worker::is_running) {
            return Ok(());
        }

        let transport = self.transport.clone();
        let buffer = self.buffer.clone();
        let out_endpoint = self.out_endpoint;
        let timeout = self.transfer_timeout;

        let unblock_buffer = self.buffer.clone();
        let worker = Worker::spawn(
            "usb-serial-write",
            move || write_step(&transport, &buffer, out_endpoint, timeout),
            move || unblock_buffer.interrupt_writer(),
        )?;
        self.write_worker = Some(worker);
        Ok(())
    }
}

impl<T: UsbTransport + 'static> Drop for SerialPort<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// One iteration of the read worker: wait for the in-flight inbound transfer,
/// deliver its bytes, and immediately re-issue the next one so the pipeline
/// never stalls.
fn read_step<T: UsbTransport>(
    transport: &Arc<T>,
    buffer: &Arc<TransferBuffer>,
    callback: &Arc<Mutex<Option<ReadCallback>>>,
    in_endpoint: u8,
) {
    match transport.wait_completed() {
        Ok(completed)
            if completed.kind == TransferKind::Bulk
                && completed.is_inbound()
                && completed.endpoint == in_endpoint =>
        {
            let data = buffer.snapshot_and_clear();
            trace!(bytes = data.len(), "inbound transfer completed");

            if let Some(cb) = callback.lock().unwrap().as_mut() {
                cb(&data);
            }

            if let Err(e) = transport.submit_read(in_endpoint, buffer.clone(), MAX_TRANSFER_CHUNK) {
                warn!("failed to re-issue inbound transfer: {e}");
            }
        }
        Ok(other) => {
            // Completion for some other endpoint or type; not ours to forward.
            trace!(endpoint = other.endpoint, "ignoring unrelated completion");
        }
        // Normal shutdown, not a failure.
        Err(TransferError::Cancelled) => {}
        Err(e) => {
            warn!("inbound transfer failed: {e}");
            // The next iteration is the retry; keep the pipeline primed.
            if let Err(e) = transport.submit_read(in_endpoint, buffer.clone(), MAX_TRANSFER_CHUNK) {
                warn!("failed to re-issue inbound transfer: {e}");
            }
        }
    }
}

/// One iteration of the write worker: block for the next queued chunk and
/// push it out with a single bounded transfer.
fn write_step<T: UsbTransport>(
    transport: &Arc<T>,
    buffer: &Arc<TransferBuffer>,
    out_endpoint: u8,
    timeout: Duration,
) {
    // `None` means the wait was interrupted; the loop flag decides what next.
    let Some(chunk) = buffer.dequeue_write() else {
        return;
    };

    match transport.bulk_write(out_endpoint, &chunk, timeout) {
        Ok(sent) => trace!(bytes = sent, "outbound transfer completed"),
        // Fire-and-forget contract: the chunk is dropped, the worker lives on.
        Err(e) => warn!(bytes = chunk.len(), "outbound transfer failed: {e}"),
    }
}
