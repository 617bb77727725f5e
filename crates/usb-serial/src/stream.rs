//! Blocking stream adapter over a sync-mode port.
//!
//! [`SyncStream`] gives pull-based callers `std::io`-style semantics on top
//! of the single-transfer primitives. Single-byte reads are served from a
//! look-ahead cache refilled one transfer at a time; bulk reads through
//! [`std::io::Read`] bypass that cache and hit the endpoint directly.
//! Callers mixing the two must accept that bulk reads do not see bytes
//! already buffered for single-byte reads.

use std::io;
use std::time::Duration;

use crate::buffer::MAX_TRANSFER_CHUNK;
use crate::error::{Error, Result};
use crate::port::{PortMode, SerialPort};
use crate::transport::{TransferError, UsbTransport};

/// Pull-based byte stream over a sync-mode [`SerialPort`].
pub struct SyncStream<'p, T: UsbTransport + 'static> {
    port: &'p SerialPort<T>,
    timeout: Duration,
    lookahead: Box<[u8]>,
    pos: usize,
    len: usize,
}

impl<T: UsbTransport + 'static> SerialPort<T> {
    /// Stream view of this port. Fails on async-mode ports, which have no
    /// caller-driven read path.
    pub fn stream(&self) -> Result<SyncStream<'_, T>> {
        SyncStream::new(self)
    }
}

impl<'p, T: UsbTransport + 'static> SyncStream<'p, T> {
    pub fn new(port: &'p SerialPort<T>) -> Result<Self> {
        if port.mode() != PortMode::Sync {
            return Err(Error::WrongMode);
        }
        Ok(Self {
            port,
            timeout: port.transfer_timeout(),
            lookahead: vec![0u8; MAX_TRANSFER_CHUNK].into_boxed_slice(),
            pos: 0,
            len: 0,
        })
    }

    /// Per-transfer timeout for this stream's reads and writes.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Bytes buffered for single-byte reads and not yet consumed.
    pub fn available(&self) -> usize {
        self.len - self.pos
    }

    /// Read one byte, refilling the look-ahead with a blocking transfer when
    /// it runs dry.
    ///
    /// Returns `Ok(None)` only when the transport reports the device itself
    /// is gone, never merely because a poll came back empty. Timeouts and
    /// transient failures surface as errors.
    pub fn read_byte(&mut self) -> Result<Option<u8>> {
        if self.pos < self.len {
            let byte = self.lookahead[self.pos];
            self.pos += 1;
            return Ok(Some(byte));
        }

        self.pos = 0;
        self.len = 0;
        loop {
            match self.port.sync_read(&mut self.lookahead, self.timeout) {
                // Empty completion; not end-of-stream.
                Ok(0) => continue,
                Ok(n) => {
                    self.len = n;
                    self.pos = 1;
                    return Ok(Some(self.lookahead[0]));
                }
                Err(Error::Transfer(e)) if e.is_disconnect() => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }
}

impl<T: UsbTransport + 'static> io::Read for SyncStream<'_, T> {
    /// One direct blocking transfer into `buf`, bypassing the look-ahead.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.sync_read(buf, self.timeout) {
            Ok(n) => Ok(n),
            Err(Error::Transfer(e)) if e.is_disconnect() => Ok(0),
            Err(Error::Transfer(TransferError::Timeout)) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "bulk read timed out",
            )),
            Err(e) => Err(io::Error::other(e)),
        }
    }
}

impl<T: UsbTransport + 'static> io::Write for SyncStream<'_, T> {
    /// One direct blocking transfer of `buf`.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.port.sync_write(buf, self.timeout) {
            Ok(n) => Ok(n),
            Err(Error::Transfer(TransferError::Timeout)) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "bulk write timed out",
            )),
            Err(e) => Err(io::Error::other(e)),
        }
    }

    /// Writes are unbuffered; nothing to flush.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use std::io::{Read, Write};
    use std::sync::Arc;

    fn sync_port() -> (Arc<MockTransport>, SerialPort<Arc<MockTransport>>) {
        let mock = Arc::new(MockTransport::new());
        let port = SerialPort::open_sync(mock.clone(), 0x81, 0x01).unwrap();
        (mock, port)
    }

    #[test]
    fn test_stream_requires_sync_mode() {
        let port = SerialPort::open(MockTransport::new(), 0x81, 0x01).unwrap();
        assert!(matches!(port.stream(), Err(Error::WrongMode)));
    }

    #[test]
    fn test_read_byte_drains_lookahead() {
        let (mock, port) = sync_port();
        let mut stream = port.stream().unwrap();
        stream.set_timeout(Duration::from_millis(200));

        mock.push_inbound(&[10, 20, 30]);

        // First byte triggers the refill transfer.
        assert_eq!(stream.read_byte().unwrap(), Some(10));
        assert_eq!(stream.available(), 2);

        // The rest come from the cache without touching the transport.
        assert_eq!(stream.read_byte().unwrap(), Some(20));
        assert_eq!(stream.available(), 1);
        assert_eq!(stream.read_byte().unwrap(), Some(30));
        assert_eq!(stream.available(), 0);
    }

    #[test]
    fn test_read_byte_reports_timeout_as_error() {
        let (_mock, port) = sync_port();
        let mut stream = port.stream().unwrap();
        stream.set_timeout(Duration::from_millis(50));

        assert!(matches!(
            stream.read_byte(),
            Err(Error::Transfer(TransferError::Timeout))
        ));
    }

    #[test]
    fn test_read_byte_signals_end_on_disconnect() {
        let (mock, port) = sync_port();
        let mut stream = port.stream().unwrap();

        mock.fail_next_read(TransferError::NoDevice);
        assert_eq!(stream.read_byte().unwrap(), None);
    }

    #[test]
    fn test_bulk_read_bypasses_lookahead() {
        let (mock, port) = sync_port();
        let mut stream = port.stream().unwrap();
        stream.set_timeout(Duration::from_millis(200));

        // Prime the look-ahead with one chunk and leave bytes unread.
        mock.push_inbound(&[1, 2, 3, 4]);
        assert_eq!(stream.read_byte().unwrap(), Some(1));
        assert_eq!(stream.available(), 3);

        // The bulk read returns the next transfer, not the buffered bytes.
        mock.push_inbound(&[9, 9]);
        let mut buf = [0u8; 8];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[9, 9]);

        // Buffered bytes are still there for single-byte readers.
        assert_eq!(stream.available(), 3);
        assert_eq!(stream.read_byte().unwrap(), Some(2));
    }

    #[test]
    fn test_write_goes_to_out_endpoint() {
        let (mock, port) = sync_port();
        let mut stream = port.stream().unwrap();

        stream.write_all(b"ping").unwrap();
        stream.flush().unwrap();

        assert_eq!(mock.written(), vec![(0x01, b"ping".to_vec())]);
    }
}
