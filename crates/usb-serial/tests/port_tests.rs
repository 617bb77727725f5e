//! Integration tests for the serial port over the mock transport.
//!
//! These exercise the full threaded paths: the async read pipeline with its
//! one-in-flight re-issue policy, the write worker's chunked FIFO drain, and
//! worker shutdown under blocking waits.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use usb_serial::transport::mock::MockTransport;
use usb_serial::transport::TransferKind;
use usb_serial::{Error, SerialPort, TransferError, MAX_TRANSFER_CHUNK};

const IN_EP: u8 = 0x81;
const OUT_EP: u8 = 0x01;

/// Poll `cond` until it holds or the deadline passes.
fn wait_for(cond: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn async_port() -> (Arc<MockTransport>, SerialPort<Arc<MockTransport>>) {
    let mock = Arc::new(MockTransport::new());
    let port = SerialPort::open(mock.clone(), IN_EP, OUT_EP).unwrap();
    (mock, port)
}

mod read_path {
    use super::*;

    #[test]
    fn test_callback_invoked_once_and_pipeline_reprimed() {
        let (mock, port) = async_port();

        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();
        {
            let calls = calls.clone();
            port.read(move |data: &[u8]| {
                calls.fetch_add(1, Ordering::SeqCst);
                tx.send(data.to_vec()).unwrap();
            })
            .unwrap();
        }
        assert_eq!(mock.submitted_reads(), 1);

        mock.push_inbound(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);

        let delivered = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(delivered, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);

        // Exactly one new transfer goes out after the data is drained.
        assert!(wait_for(|| mock.submitted_reads() == 2, Duration::from_secs(2)));
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(mock.submitted_reads(), 2);
    }

    #[test]
    fn test_chunks_delivered_in_completion_order() {
        let (mock, port) = async_port();

        let (tx, rx) = mpsc::channel();
        port.read(move |data: &[u8]| tx.send(data.to_vec()).unwrap())
            .unwrap();

        mock.push_inbound(b"first");
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), b"first");

        mock.push_inbound(b"second");
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), b"second");
    }

    #[test]
    fn test_unrelated_completions_are_ignored() {
        let (mock, port) = async_port();

        let (tx, rx) = mpsc::channel();
        port.read(move |data: &[u8]| tx.send(data.to_vec()).unwrap())
            .unwrap();

        // A completion on some other endpoint must not reach the callback.
        mock.push_completion(0x82, TransferKind::Interrupt);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        // The pipeline still works afterwards.
        mock.push_inbound(b"real");
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), b"real");
    }

    #[test]
    fn test_failed_transfer_skips_iteration_without_killing_worker() {
        let (mock, port) = async_port();

        let (tx, rx) = mpsc::channel();
        port.read(move |data: &[u8]| tx.send(data.to_vec()).unwrap())
            .unwrap();

        mock.fail_next_read(TransferError::Io);
        mock.push_inbound(b"after-error");

        // The worker retried on its next iteration and delivered the data.
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            b"after-error"
        );
    }

    #[test]
    fn test_replacing_callback_keeps_one_transfer_in_flight() {
        let (mock, port) = async_port();

        port.read(|_: &[u8]| {}).unwrap();
        assert_eq!(mock.submitted_reads(), 1);

        let (tx, rx) = mpsc::channel();
        port.read(move |data: &[u8]| tx.send(data.to_vec()).unwrap())
            .unwrap();
        // Re-registration swaps the callback but issues no second transfer.
        assert_eq!(mock.submitted_reads(), 1);

        mock.push_inbound(b"swap");
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), b"swap");
    }
}

mod write_path {
    use super::*;

    #[test]
    fn test_large_write_drains_in_capped_chunks() {
        let (mock, port) = async_port();

        let data: Vec<u8> = (0..20_000).map(|i| (i % 249) as u8).collect();
        port.write(&data).unwrap();

        assert!(wait_for(
            || mock.written_bytes().len() == 20_000,
            Duration::from_secs(2)
        ));
        assert_eq!(mock.written_bytes(), data);
        assert_eq!(
            mock.written_chunk_sizes(),
            vec![MAX_TRANSFER_CHUNK, 20_000 - MAX_TRANSFER_CHUNK]
        );
    }

    #[test]
    fn test_writes_transfer_in_fifo_order() {
        let (mock, port) = async_port();

        port.write(b"alpha ").unwrap();
        port.write(b"beta ").unwrap();
        port.write(b"gamma").unwrap();

        assert!(wait_for(
            || mock.written_bytes().len() == 16,
            Duration::from_secs(2)
        ));
        assert_eq!(mock.written_bytes(), b"alpha beta gamma");
    }

    #[test]
    fn test_failed_write_drops_chunk_and_continues() {
        let (mock, port) = async_port();

        mock.fail_next_write(TransferError::Stall);
        port.write(b"lost").unwrap();
        port.write(b"kept").unwrap();

        assert!(wait_for(
            || mock.written_bytes() == b"kept",
            Duration::from_secs(2)
        ));
    }

    #[test]
    fn test_empty_write_is_a_noop() {
        let (mock, port) = async_port();

        port.write(&[]).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(mock.written().is_empty());
    }
}

mod sync_mode {
    use super::*;

    #[test]
    fn test_sync_read_times_out_within_bound() {
        let mock = Arc::new(MockTransport::new());
        let port = SerialPort::open_sync(mock, IN_EP, OUT_EP).unwrap();

        let start = Instant::now();
        let mut buf = [0u8; 64];
        let result = port.sync_read(&mut buf, Duration::from_millis(100));

        assert!(matches!(result, Err(Error::Transfer(TransferError::Timeout))));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_sync_round_trip() {
        let mock = Arc::new(MockTransport::new());
        let port = SerialPort::open_sync(mock.clone(), IN_EP, OUT_EP).unwrap();

        assert_eq!(
            port.sync_write(b"request", Duration::from_millis(100)).unwrap(),
            7
        );
        assert_eq!(mock.written(), vec![(OUT_EP, b"request".to_vec())]);

        mock.push_inbound(b"response");
        let mut buf = [0u8; 64];
        let n = port.sync_read(&mut buf, Duration::from_millis(100)).unwrap();
        assert_eq!(&buf[..n], b"response");
    }
}

mod lifecycle {
    use super::*;

    #[test]
    fn test_close_stops_blocked_workers_promptly() {
        let (_mock, mut port) = async_port();

        // Both workers are blocked: the writer on an empty queue, the reader
        // waiting for a completion. Close must join them within a short bound.
        std::thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        port.close();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(!port.is_open());
    }

    #[test]
    fn test_drop_stops_workers() {
        let mock = Arc::new(MockTransport::new());
        {
            let port = SerialPort::open(mock.clone(), IN_EP, OUT_EP).unwrap();
            port.write(b"tail").unwrap();
            assert!(wait_for(
                || mock.written_bytes() == b"tail",
                Duration::from_secs(2)
            ));
        }
        // Dropping the port joined the workers; nothing further is written.
        mock.push_inbound(b"ignored");
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(mock.written_bytes(), b"tail");
    }

    #[test]
    fn test_restart_io_keeps_delivering() {
        let (mock, mut port) = async_port();

        let (tx, rx) = mpsc::channel();
        port.read(move |data: &[u8]| tx.send(data.to_vec()).unwrap())
            .unwrap();

        mock.push_inbound(b"before");
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), b"before");

        port.restart_io().unwrap();

        mock.push_inbound(b"after");
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), b"after");

        port.write(b"still-writing").unwrap();
        assert!(wait_for(
            || mock.written_bytes() == b"still-writing",
            Duration::from_secs(2)
        ));
    }

    #[test]
    fn test_restart_io_requires_async_mode() {
        let mut port = SerialPort::open_sync(MockTransport::new(), IN_EP, OUT_EP).unwrap();
        assert!(matches!(port.restart_io(), Err(Error::WrongMode)));
    }
}
