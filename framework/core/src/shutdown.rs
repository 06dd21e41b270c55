use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::{Receiver, Sender};
use tokio::sync::Mutex;

/// Two-phase stop signal for a test run.
///
/// A *drain* asks every virtual user to finish its current iteration and not start another.
/// This is how a scenario ends when its configured duration elapses.
///
/// An *abort* additionally cancels in-flight work. Driver calls raced against
/// [ShutdownListener::wait_for_abort] return early and the iteration is recorded as aborted.
/// Aborts are used for Ctrl-C and for thresholds configured to abort the run on breach.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    draining: Arc<AtomicBool>,
    aborted: Arc<AtomicBool>,
    abort_tx: Sender<()>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            draining: Arc::new(AtomicBool::new(false)),
            aborted: Arc::new(AtomicBool::new(false)),
            abort_tx: tokio::sync::broadcast::channel(1).0,
        }
    }

    /// Stop starting new iterations, let in-flight iterations complete.
    pub fn drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    /// Stop immediately, cancelling in-flight iterations.
    pub fn abort(&self) {
        self.draining.store(true, Ordering::SeqCst);
        self.aborted.store(true, Ordering::SeqCst);
        if let Err(e) = self.abort_tx.send(()) {
            // Fails when nobody is waiting on the abort signal, which is harmless.
            log::debug!("No listeners for abort signal: {e:?}");
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn new_listener(&self) -> ShutdownListener {
        ShutdownListener {
            draining: self.draining.clone(),
            aborted: self.aborted.clone(),
            abort_rx: Arc::new(Mutex::new(self.abort_tx.subscribe())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShutdownListener {
    draining: Arc<AtomicBool>,
    aborted: Arc<AtomicBool>,
    abort_rx: Arc<Mutex<Receiver<()>>>,
}

impl ShutdownListener {
    /// Point in time check whether new work should stop being started.
    ///
    /// Virtual users check this between iterations so that a drain is cooperative: the current
    /// iteration always runs to completion.
    pub fn should_stop(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Wait for a hard abort. Safe to race against other futures to cancel work in progress.
    pub async fn wait_for_abort(&self) {
        if self.aborted.load(Ordering::SeqCst) {
            return;
        }

        let mut rx = self.abort_rx.lock().await;
        // A lagged or closed channel still means an abort happened.
        let _ = rx.recv().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_does_not_abort() {
        let handle = ShutdownHandle::new();
        let listener = handle.new_listener();

        handle.drain();

        assert!(listener.should_stop());
        assert!(!listener.is_aborted());
    }

    #[tokio::test]
    async fn abort_wakes_waiters() {
        let handle = ShutdownHandle::new();
        let listener = handle.new_listener();

        let waiter = {
            let listener = listener.clone();
            tokio::spawn(async move { listener.wait_for_abort().await })
        };

        handle.abort();
        waiter.await.unwrap();

        assert!(listener.should_stop());
        assert!(listener.is_aborted());
    }

    #[tokio::test]
    async fn abort_after_subscribe_is_not_missed() {
        let handle = ShutdownHandle::new();
        let listener = handle.new_listener();

        handle.abort();

        // Resolves immediately because the aborted flag is already set.
        listener.wait_for_abort().await;
    }
}
