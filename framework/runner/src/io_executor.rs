use std::future::Future;
use std::time::Duration;

use anyhow::Context as _;
use slipstream_core::prelude::{InterruptedError, ShutdownListener};

/// Owns the Tokio runtime that services driver I/O for every virtual user.
///
/// VUs are plain threads; they suspend here while awaiting a protocol response. Futures are
/// raced against the abort signal so a hard stop interrupts outstanding calls promptly.
#[derive(Debug)]
pub struct IoExecutor {
    runtime: tokio::runtime::Runtime,
}

impl IoExecutor {
    pub(crate) fn new() -> anyhow::Result<Self> {
        Ok(Self {
            runtime: tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?,
        })
    }

    /// Run async code in place, blocking the calling VU thread until it completes or the run
    /// is aborted. An aborted call fails with [InterruptedError], which the runner records as
    /// an aborted iteration rather than a request failure.
    pub fn execute_in_place<T>(
        &self,
        listener: &ShutdownListener,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        let listener = listener.clone();
        self.runtime.block_on(async move {
            tokio::select! {
                result = fut => result,
                _ = listener.wait_for_abort() => {
                    Err(anyhow::anyhow!(InterruptedError::default()))
                },
            }
        })
    }

    /// Submit async code to run in the background. The future is not cancelled on shutdown and
    /// the runner does not wait for it when the run ends.
    pub fn spawn(&self, fut: impl Future<Output = ()> + Send + 'static) {
        self.runtime.spawn(fut);
    }

    /// Abort-interruptible sleep, used for iteration pacing. A drain lets sleeps finish so the
    /// current iteration completes on its own schedule.
    pub(crate) fn sleep(
        &self,
        listener: &ShutdownListener,
        duration: Duration,
    ) -> anyhow::Result<()> {
        self.execute_in_place(listener, async move {
            tokio::time::sleep(duration).await;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use slipstream_core::prelude::ShutdownHandle;

    use super::*;

    #[test]
    fn abort_interrupts_in_flight_future() {
        let executor = IoExecutor::new().unwrap();
        let shutdown = ShutdownHandle::new();
        let listener = shutdown.new_listener();

        let aborter = shutdown.clone();
        executor.spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            aborter.abort();
        });

        let result = executor.sleep(&listener, Duration::from_secs(30));
        let err = result.unwrap_err();
        assert!(err.is::<InterruptedError>());
    }

    #[test]
    fn completed_future_returns_value() {
        let executor = IoExecutor::new().unwrap();
        let shutdown = ShutdownHandle::new();
        let listener = shutdown.new_listener();

        let value = executor
            .execute_in_place(&listener, async { Ok(42) })
            .unwrap();
        assert_eq!(value, 42);
    }
}
