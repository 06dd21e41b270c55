use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use slipstream_core::prelude::{ShutdownHandle, ShutdownListener};
use slipstream_metrics::prelude::{names, MetricStore};

use crate::driver::Outcome;
use crate::io_executor::IoExecutor;

pub trait UserValuesConstraint: Default + Debug + Send + Sync + 'static {}

impl UserValuesConstraint for () {}

/// Run-wide context. The value slot is populated by the global setup hook and becomes
/// read-only once VUs start, so correlated state shared across VUs (such as a token minted in
/// setup) is never mutated concurrently.
#[derive(Debug)]
pub struct RunnerContext<RV: UserValuesConstraint> {
    io: Arc<IoExecutor>,
    store: Arc<MetricStore>,
    shutdown: ShutdownHandle,
    value: RV,
}

impl<RV: UserValuesConstraint> RunnerContext<RV> {
    pub(crate) fn new(io: Arc<IoExecutor>, store: Arc<MetricStore>, shutdown: ShutdownHandle) -> Self {
        Self {
            io,
            store,
            shutdown,
            value: Default::default(),
        }
    }

    pub fn io(&self) -> &Arc<IoExecutor> {
        &self.io
    }

    pub fn store(&self) -> &Arc<MetricStore> {
        &self.store
    }

    pub fn get(&self) -> &RV {
        &self.value
    }

    pub fn get_mut(&mut self) -> &mut RV {
        &mut self.value
    }

    /// Run async work in place from a global hook, blocking until it completes or the run is
    /// aborted.
    pub fn execute<T>(
        &self,
        fut: impl std::future::Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        let listener = self.shutdown.new_listener();
        self.io.execute_in_place(&listener, fut)
    }

    /// Stop the run cooperatively: in-flight iterations complete, no new ones start.
    pub fn stop_run(&self) {
        self.shutdown.drain();
    }

    /// Hard-abort the run, cancelling in-flight iterations.
    pub fn abort_run(&self) {
        self.shutdown.abort();
    }

    pub(crate) fn shutdown_handle(&self) -> &ShutdownHandle {
        &self.shutdown
    }
}

/// Per-VU context handed to the setup, iteration and teardown hooks.
///
/// The value slot is private to this VU: correlated values extracted from one response and
/// used in a later call live either here (across iterations) or in hook locals (within one
/// iteration). VUs never share mutable state.
pub struct VuContext<RV: UserValuesConstraint, V: UserValuesConstraint> {
    scenario: Arc<str>,
    vu_id: usize,
    runner: Arc<RunnerContext<RV>>,
    listener: ShutdownListener,
    global_seq: Arc<AtomicU64>,
    iteration: u64,
    global_iteration: u64,
    value: V,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> VuContext<RV, V> {
    pub(crate) fn new(
        scenario: Arc<str>,
        vu_id: usize,
        runner: Arc<RunnerContext<RV>>,
        listener: ShutdownListener,
        global_seq: Arc<AtomicU64>,
    ) -> Self {
        Self {
            scenario,
            vu_id,
            runner,
            listener,
            global_seq,
            iteration: 0,
            global_iteration: 0,
            value: Default::default(),
        }
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    pub fn vu_id(&self) -> usize {
        self.vu_id
    }

    /// Sequence number of the current iteration for this VU, strictly increasing from 1.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Sequence number of the current iteration across all VUs of this scenario.
    pub fn global_iteration(&self) -> u64 {
        self.global_iteration
    }

    pub fn runner_context(&self) -> &Arc<RunnerContext<RV>> {
        &self.runner
    }

    pub fn shutdown_listener(&self) -> &ShutdownListener {
        &self.listener
    }

    pub fn get(&self) -> &V {
        &self.value
    }

    pub fn get_mut(&mut self) -> &mut V {
        &mut self.value
    }

    /// Run a driver call (or any async work) in place, racing it against the abort signal.
    pub fn execute<T>(
        &self,
        fut: impl std::future::Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        self.runner.io().execute_in_place(&self.listener, fut)
    }

    /// Pacing sleep between steps. Interrupted by a hard abort, not by a drain.
    pub fn pause(&self, duration: Duration) -> anyhow::Result<()> {
        self.runner.io().sleep(&self.listener, duration)
    }

    /// Evaluate a named check and record it. Checks are diagnostic: a failed check never
    /// gates the run by itself, though thresholds may be set on the resulting rate metrics.
    pub fn check(&self, name: &str, pass: bool) -> bool {
        let store = self.runner.store();
        store.rate(names::CHECKS, Some(&self.scenario), pass);
        store.rate(&names::check(name), Some(&self.scenario), pass);
        if !pass {
            log::debug!(
                "Check '{name}' failed (scenario {}, vu {})",
                self.scenario,
                self.vu_id
            );
        }
        pass
    }

    /// Record the built-in request metrics for one driver outcome.
    pub fn record_request(&self, outcome: &Outcome) {
        let store = self.runner.store();
        store.trend(
            names::REQUEST_DURATION,
            Some(&self.scenario),
            outcome.latency_ms(),
        );
        store.rate(names::REQUEST_FAILED, Some(&self.scenario), outcome.failed());
    }

    /// Record a custom latency sample, in milliseconds.
    pub fn trend(&self, name: &str, value_ms: f64) {
        self.runner.store().trend(name, Some(&self.scenario), value_ms);
    }

    /// Record a custom boolean sample.
    pub fn rate(&self, name: &str, hit: bool) {
        self.runner.store().rate(name, Some(&self.scenario), hit);
    }

    /// Add to a custom counter.
    pub fn count(&self, name: &str, by: u64) {
        self.runner.store().counter(name, Some(&self.scenario), by);
    }

    pub(crate) fn begin_iteration(&mut self) {
        self.iteration += 1;
        self.global_iteration = self.global_seq.fetch_add(1, Ordering::SeqCst) + 1;
    }
}

#[cfg(test)]
mod tests {
    use slipstream_metrics::prelude::{MetricKey, MetricSummary};

    use super::*;

    fn test_vu_context() -> VuContext<(), ()> {
        let io = Arc::new(IoExecutor::new().unwrap());
        let store = Arc::new(MetricStore::new());
        let shutdown = ShutdownHandle::new();
        let listener = shutdown.new_listener();
        let runner = Arc::new(RunnerContext::<()>::new(io, store, shutdown));
        VuContext::new(
            Arc::from("auth"),
            1,
            runner,
            listener,
            Arc::new(AtomicU64::new(0)),
        )
    }

    #[test]
    fn checks_record_aggregate_and_named_rates() {
        let ctx = test_vu_context();
        assert!(ctx.check("login ok", true));
        assert!(!ctx.check("login ok", false));

        let snapshot = ctx.runner_context().store().snapshot();
        assert_eq!(
            snapshot.get(&MetricKey::scoped("checks.login ok", "auth")),
            Some(&MetricSummary::Rate {
                trues: 1,
                total: 2,
                rate: 0.5
            })
        );
        assert!(snapshot.contains_key(&MetricKey::global(names::CHECKS)));
    }

    #[test]
    fn iteration_sequence_numbers_increase() {
        let mut ctx = test_vu_context();
        ctx.begin_iteration();
        assert_eq!(ctx.iteration(), 1);
        assert_eq!(ctx.global_iteration(), 1);
        ctx.begin_iteration();
        assert_eq!(ctx.iteration(), 2);
        assert_eq!(ctx.global_iteration(), 2);
    }
}
