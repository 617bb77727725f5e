//! Cancellable background worker threads.
//!
//! Every background loop in this crate is built from [`Worker`]: a named OS
//! thread that repeatedly invokes a step closure while a shared running flag
//! holds. Each step performs at most one blocking or transfer operation, so
//! cancellation is observed at the next safe point. Because the step may be
//! blocked (on an empty write queue, or on an in-flight transfer), stopping
//! is a flag flip plus an interruption hook that unblocks the current wait.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// Handle to a running worker loop.
///
/// Stopping is idempotent and callable from any thread. `stop` joins the
/// thread before returning, which is the handoff guarantee that lets a
/// same-role worker be restarted immediately afterwards.
pub(crate) struct Worker {
    running: Arc<AtomicBool>,
    unblock: Box<dyn Fn() + Send + Sync>,
    handle: Option<JoinHandle<()>>,
    name: String,
}

impl Worker {
    /// Spawn a named worker thread looping over `step`.
    ///
    /// `unblock` is invoked by [`stop`](Self::stop) after the running flag is
    /// cleared; it must wake the step out of whatever it may be blocked on.
    pub fn spawn<S, U>(name: &str, mut step: S, unblock: U) -> io::Result<Self>
    where
        S: FnMut() + Send + 'static,
        U: Fn() + Send + Sync + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let thread_name = name.to_string();

        let handle = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                debug!(worker = %thread_name, "worker started");
                while flag.load(Ordering::Acquire) {
                    step();
                }
                debug!(worker = %thread_name, "worker stopped");
            })?;

        Ok(Self {
            running,
            unblock: Box::new(unblock),
            handle: Some(handle),
            name: name.to_string(),
        })
    }

    /// Whether the loop thread is still live.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// OS identity of the loop thread, for asserting a worker was kept
    /// rather than replaced.
    #[cfg(test)]
    pub fn thread_id(&self) -> Option<std::thread::ThreadId> {
        self.handle.as_ref().map(|h| h.thread().id())
    }

    /// Stop the loop and join the thread.
    ///
    /// After the flag is cleared no further step executes; the interruption
    /// hook wakes a step blocked mid-wait so shutdown is prompt. Calling this
    /// twice, or on an already-finished worker, is a no-op.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        (self.unblock)();

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(worker = %self.name, "worker thread panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}
