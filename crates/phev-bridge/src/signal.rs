//! Coalescing single-slot notification

use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

/// A mailbox holding at most one pending notification.
///
/// `notify` never blocks; notifications sent while one is already pending
/// are dropped. Each pending notification is consumed by exactly one waiter.
pub struct Signal {
    tx: mpsc::Sender<()>,
    rx: Mutex<mpsc::Receiver<()>>,
}

impl Signal {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Post a notification. Returns false if one was already pending.
    pub fn notify(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }

    /// Drop any pending notification.
    ///
    /// No-op while a waiter is parked; the slot is empty in that case.
    pub fn clear(&self) {
        if let Ok(mut rx) = self.rx.try_lock() {
            while rx.try_recv().is_ok() {}
        }
    }

    /// Wait for and consume the next notification
    pub async fn wait(&self) {
        let mut rx = self.rx.lock().await;
        // The sender lives as long as `self`, so `recv` only returns `Some`
        let _ = rx.recv().await;
    }

    /// Like [`wait`](Self::wait) with an upper bound. Returns true if a
    /// notification was consumed.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test]
    async fn test_notifications_coalesce() {
        let signal = Signal::new();
        assert!(signal.notify());
        assert!(!signal.notify());

        signal.wait().await;
        assert!(!signal.wait_timeout(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_clear_drops_pending() {
        let signal = Signal::new();
        signal.notify();
        signal.clear();
        assert!(!signal.wait_timeout(Duration::from_millis(10)).await);
    }

    #[test]
    fn test_waiter_woken_by_notify() {
        let signal = Signal::new();
        let mut waiter = task::spawn(signal.wait());
        assert_pending!(waiter.poll());

        signal.notify();
        assert!(waiter.is_woken());
        assert_ready!(waiter.poll());
    }
}
