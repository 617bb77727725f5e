//! rusb-backed transport.
//!
//! Wraps an opened `rusb::DeviceHandle` as a [`UsbTransport`]. The issued
//! inbound transfer is serviced by polling the endpoint in short slices so a
//! blocked [`wait_completed`](UsbTransport::wait_completed) stays responsive
//! to cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use ::rusb::{Context, DeviceHandle};
use tracing::{debug, warn};

use super::{CompletedTransfer, TransferError, TransferKind, UsbTransport};
use crate::buffer::TransferBuffer;

/// Slice length for cancellable waits.
const POLL_SLICE: Duration = Duration::from_millis(100);

/// [`UsbTransport`] over an opened rusb device handle.
pub struct RusbTransport {
    handle: DeviceHandle<Context>,
    claimed: Vec<u8>,
    pending: Mutex<Option<PendingRead>>,
    submitted: Condvar,
    cancelled: AtomicBool,
}

struct PendingRead {
    endpoint: u8,
    window: Arc<TransferBuffer>,
    max_len: usize,
}

impl RusbTransport {
    /// Take ownership of an opened device handle and claim the given
    /// interfaces, detaching kernel drivers where one is active.
    pub fn open(handle: DeviceHandle<Context>, interfaces: &[u8]) -> Result<Self, TransferError> {
        for &interface in interfaces {
            match handle.kernel_driver_active(interface) {
                Ok(true) => {
                    debug!(interface, "detaching kernel driver");
                    if let Err(e) = handle.detach_kernel_driver(interface) {
                        warn!(interface, "failed to detach kernel driver: {e}");
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    debug!(interface, "could not query kernel driver state: {e}");
                }
            }

            handle
                .claim_interface(interface)
                .map_err(TransferError::from)?;
            debug!(interface, "claimed interface");
        }

        Ok(Self {
            handle,
            claimed: interfaces.to_vec(),
            pending: Mutex::new(None),
            submitted: Condvar::new(),
            cancelled: AtomicBool::new(false),
        })
    }

    fn take_cancel(&self) -> bool {
        self.cancelled.swap(false, Ordering::AcqRel)
    }
}

impl UsbTransport for RusbTransport {
    fn submit_read(
        &self,
        endpoint: u8,
        window: Arc<TransferBuffer>,
        max_len: usize,
    ) -> Result<(), TransferError> {
        let mut slot = self.pending.lock().unwrap();
        *slot = Some(PendingRead {
            endpoint,
            window,
            max_len,
        });
        self.submitted.notify_one();
        Ok(())
    }

    fn wait_completed(&self) -> Result<CompletedTransfer, TransferError> {
        // Phase one: wait for a read to be submitted.
        let pending = {
            let mut slot = self.pending.lock().unwrap();
            loop {
                if self.take_cancel() {
                    return Err(TransferError::Cancelled);
                }
                if let Some(pending) = slot.take() {
                    break pending;
                }
                let (guard, _) = self.submitted.wait_timeout(slot, POLL_SLICE).unwrap();
                slot = guard;
            }
        };

        // Phase two: poll the endpoint in short slices until data lands in
        // the window, checking for cancellation between slices.
        loop {
            if self.take_cancel() {
                return Err(TransferError::Cancelled);
            }

            let mut failure = None;
            let received = pending.window.fill_read_window(|buf| {
                let len = buf.len().min(pending.max_len);
                match self.handle.read_bulk(pending.endpoint, &mut buf[..len], POLL_SLICE) {
                    Ok(n) => n,
                    // No data in this slice; keep the window empty and retry.
                    Err(::rusb::Error::Timeout) => 0,
                    Err(e) => {
                        failure = Some(e);
                        0
                    }
                }
            });

            if let Some(e) = failure {
                return Err(e.into());
            }
            if received > 0 {
                return Ok(CompletedTransfer {
                    endpoint: pending.endpoint,
                    kind: TransferKind::Bulk,
                });
            }
        }
    }

    fn bulk_read(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransferError> {
        self.handle
            .read_bulk(endpoint, buf, timeout)
            .map_err(TransferError::from)
    }

    fn bulk_write(
        &self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransferError> {
        self.handle
            .write_bulk(endpoint, data, timeout)
            .map_err(TransferError::from)
    }

    fn cancel_wait(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.submitted.notify_all();
    }
}

impl Drop for RusbTransport {
    fn drop(&mut self) {
        // Hand the interfaces back to the kernel.
        for &interface in &self.claimed {
            if let Err(e) = self.handle.release_interface(interface) {
                warn!(interface, "failed to release interface: {e}");
            }
            if let Err(e) = self.handle.attach_kernel_driver(interface) {
                debug!(
                    interface,
                    "could not reattach kernel driver (may not have been detached): {e}"
                );
            }
        }
    }
}
