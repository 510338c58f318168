//! Shutdown state shared by the background loops and the request loop.
//!
//! `StopSignal` is a cloneable one-shot flag. Triggering it also drops the
//! wake-up channel's sender, so every thread parked in `wait_timeout`
//! returns immediately instead of sleeping out its tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

#[derive(Clone)]
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
    /// Dropped on trigger to wake all waiters
    wake_tx: Arc<Mutex<Option<Sender<()>>>>,
    wake_rx: Receiver<()>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, rx) = channel::bounded(0);
        Self {
            stopped: Arc::new(AtomicBool::new(false)),
            wake_tx: Arc::new(Mutex::new(Some(tx))),
            wake_rx: rx,
        }
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.wake_tx.lock().take();
    }

    /// Check if shutdown has been requested
    pub fn is_set(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for up to `timeout`, returning early once triggered.
    ///
    /// Returns `true` if the signal is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_set() {
            return true;
        }
        match self.wake_rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => self.is_set(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Setup the global Ctrl+C handler. Call once at program start.
///
/// The handler sets `stop` and then runs `on_stop` (typically unblocking
/// the transport's request loop). A second Ctrl+C exits immediately.
pub fn setup_shutdown_handler<F>(stop: StopSignal, on_stop: F) -> anyhow::Result<()>
where
    F: Fn() + Send + 'static,
{
    ctrlc::set_handler(move || {
        if stop.is_set() {
            std::process::exit(130);
        }
        crate::log!("node"; "shutting down...");
        stop.trigger();
        on_stop();
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_wait_times_out_when_not_triggered() {
        let stop = StopSignal::new();
        assert!(!stop.wait_timeout(Duration::from_millis(10)));
        assert!(!stop.is_set());
    }

    #[test]
    fn test_trigger_is_visible_to_clones() {
        let stop = StopSignal::new();
        let other = stop.clone();
        stop.trigger();
        assert!(other.is_set());
        assert!(other.wait_timeout(Duration::from_secs(5)));
    }

    #[test]
    fn test_trigger_wakes_parked_thread() {
        let stop = StopSignal::new();
        let waiter = stop.clone();
        let started = Instant::now();
        let handle = std::thread::spawn(move || waiter.wait_timeout(Duration::from_secs(30)));

        std::thread::sleep(Duration::from_millis(20));
        stop.trigger();

        assert!(handle.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_trigger_is_idempotent() {
        let stop = StopSignal::new();
        stop.trigger();
        stop.trigger();
        assert!(stop.is_set());
    }
}
