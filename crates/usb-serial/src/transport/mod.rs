//! Boundary with the underlying USB host transport.
//!
//! The core never talks to hardware directly; it drives a [`UsbTransport`],
//! which provides exactly the primitives a serial port needs: an
//! issue-and-wait pair for the async read pipeline, blocking bulk transfers
//! for everything else, and a cancellation hook so a blocked wait can be
//! interrupted during shutdown.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::buffer::TransferBuffer;

pub mod mock;
pub mod rusb;

pub use self::rusb::RusbTransport;

/// Hardware transfer kind, as reported with a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Control,
    Bulk,
    Interrupt,
}

/// Descriptor for a completed transfer, as observed by
/// [`UsbTransport::wait_completed`].
#[derive(Debug, Clone, Copy)]
pub struct CompletedTransfer {
    /// Endpoint address the transfer completed on. Bit 7 carries the
    /// direction, as on the wire.
    pub endpoint: u8,
    pub kind: TransferKind,
}

impl CompletedTransfer {
    /// Whether this completion came from an IN (device-to-host) endpoint.
    pub fn is_inbound(&self) -> bool {
        self.endpoint & 0x80 != 0
    }
}

/// Transport-level failures.
///
/// A single failed transfer never tears down a port; the worker loops log it
/// and continue, and sync callers see it as the `Err` arm of their call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("transfer timed out")]
    Timeout,

    #[error("endpoint stalled")]
    Stall,

    #[error("device is gone")]
    NoDevice,

    #[error("wait cancelled")]
    Cancelled,

    #[error("transfer I/O error")]
    Io,

    #[error("transfer failed: {0}")]
    Other(String),
}

impl TransferError {
    /// True when the error means the device itself went away, as opposed to
    /// a transient per-transfer failure.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, TransferError::NoDevice)
    }
}

impl From<::rusb::Error> for TransferError {
    fn from(err: ::rusb::Error) -> Self {
        match err {
            ::rusb::Error::Timeout => TransferError::Timeout,
            ::rusb::Error::Pipe => TransferError::Stall,
            ::rusb::Error::NoDevice => TransferError::NoDevice,
            ::rusb::Error::Interrupted => TransferError::Cancelled,
            ::rusb::Error::Io => TransferError::Io,
            other => TransferError::Other(other.to_string()),
        }
    }
}

/// Opaque transfer primitive over one opened USB device.
///
/// Implementations are shared read-only between the port and its workers
/// once opened; nothing here mutates device or connection metadata.
pub trait UsbTransport: Send + Sync {
    /// Schedule the next inbound transfer into the buffer's read window.
    ///
    /// At most one read is pending at a time; a second submission before the
    /// first completes replaces it.
    fn submit_read(
        &self,
        endpoint: u8,
        window: Arc<TransferBuffer>,
        max_len: usize,
    ) -> Result<(), TransferError>;

    /// Block until the pending inbound transfer completes, returning its
    /// descriptor. Returns [`TransferError::Cancelled`] when interrupted via
    /// [`cancel_wait`](Self::cancel_wait).
    fn wait_completed(&self) -> Result<CompletedTransfer, TransferError>;

    /// One blocking bulk IN transfer. Returns the byte count received.
    fn bulk_read(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransferError>;

    /// One blocking bulk OUT transfer. Returns the byte count sent.
    fn bulk_write(
        &self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransferError>;

    /// Interrupt a thread blocked in [`wait_completed`](Self::wait_completed).
    ///
    /// One-shot: the flag is consumed by the waiter that observes it. Safe to
    /// call with no wait in progress.
    fn cancel_wait(&self);
}

impl<T: UsbTransport + ?Sized> UsbTransport for Arc<T> {
    fn submit_read(
        &self,
        endpoint: u8,
        window: Arc<TransferBuffer>,
        max_len: usize,
    ) -> Result<(), TransferError> {
        (**self).submit_read(endpoint, window, max_len)
    }

    fn wait_completed(&self) -> Result<CompletedTransfer, TransferError> {
        (**self).wait_completed()
    }

    fn bulk_read(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransferError> {
        (**self).bulk_read(endpoint, buf, timeout)
    }

    fn bulk_write(
        &self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransferError> {
        (**self).bulk_write(endpoint, data, timeout)
    }

    fn cancel_wait(&self) {
        (**self).cancel_wait()
    }
}
