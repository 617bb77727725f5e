//! Byte-stream serial ports over USB bulk endpoint pairs.
//!
//! This crate is the driver-layer engine between an opened USB device and
//! application code that wants a serial port: a producer/consumer write
//! queue, a chunked read pipeline, cancellable worker threads, and a
//! blocking stream adapter. It does not enumerate devices, discover
//! endpoints, or speak any chipset's control protocol; those belong to
//! collaborators at the [`transport`] and [`line`] boundaries.
//!
//! A port runs in one of two modes, chosen at open time:
//!
//! - [`SerialPort::open`] starts background read and write workers; inbound
//!   chunks are pushed to a callback registered with [`SerialPort::read`],
//!   and [`SerialPort::write`] is fire-and-forget.
//! - [`SerialPort::open_sync`] exposes blocking one-transfer primitives,
//!   with [`SyncStream`] layering `std::io` semantics on top.
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use usb_serial::transport::mock::MockTransport;
//! use usb_serial::SerialPort;
//!
//! let device = Arc::new(MockTransport::new());
//! let port = SerialPort::open_sync(device.clone(), 0x81, 0x01)?;
//!
//! device.push_inbound(b"hello");
//! let mut buf = [0u8; 64];
//! let n = port.sync_read(&mut buf, Duration::from_millis(100))?;
//! assert_eq!(&buf[..n], b"hello");
//! # Ok::<(), usb_serial::Error>(())
//! ```

pub mod buffer;
pub mod error;
pub mod line;
pub mod logging;
pub mod port;
pub mod stream;
pub mod transport;
mod worker;

pub use buffer::{TransferBuffer, MAX_TRANSFER_CHUNK};
pub use error::{Error, Result};
pub use line::{DataBits, FlowControl, LineControl, LineSettings, Parity, StopBits};
pub use logging::setup_logging;
pub use port::{PortMode, ReadCallback, SerialPort, DEFAULT_TRANSFER_TIMEOUT};
pub use stream::SyncStream;
pub use transport::{
    CompletedTransfer, RusbTransport, TransferError, TransferKind, UsbTransport,
};
