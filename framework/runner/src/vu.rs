use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use slipstream_core::prelude::{InterruptedError, VuBailError};
use slipstream_metrics::prelude::names;

use crate::context::{UserValuesConstraint, VuContext};
use crate::definition::VuHook;
use crate::scheduler::{ClosedGate, OpenPool};

/// The hooks a VU thread runs, copied out of the scenario definition. Plain fn pointers, so
/// cloning per thread is free.
pub(crate) struct VuHooks<RV: UserValuesConstraint, V: UserValuesConstraint> {
    pub(crate) setup: Option<VuHook<RV, V>>,
    pub(crate) iteration: VuHook<RV, V>,
    pub(crate) teardown: Option<VuHook<RV, V>>,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> Clone for VuHooks<RV, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> Copy for VuHooks<RV, V> {}

/// Per-scenario VU lifecycle counters, used after the run to distinguish "every VU failed its
/// setup" from an ordinary finish.
#[derive(Debug, Default)]
pub(crate) struct ScenarioStats {
    vus_started: AtomicUsize,
    vus_setup_ok: AtomicUsize,
}

impl ScenarioStats {
    pub(crate) fn all_setups_failed(&self) -> bool {
        let started = self.vus_started.load(Ordering::SeqCst);
        started > 0 && self.vus_setup_ok.load(Ordering::SeqCst) == 0
    }
}

enum IterationFlow {
    Continue,
    Retire,
}

/// Run the iteration hook once and record the outcome.
///
/// An [InterruptedError] anywhere in the hook means the run was aborted mid-iteration; the
/// iteration is counted as aborted and the loop exits on its next shutdown check. Any other
/// error is recorded and logged but does not retire the VU, except a [VuBailError] which the
/// hook raises deliberately to take this VU out of service.
fn run_one_iteration<RV: UserValuesConstraint, V: UserValuesConstraint>(
    ctx: &mut VuContext<RV, V>,
    iteration: VuHook<RV, V>,
) -> IterationFlow {
    ctx.begin_iteration();
    let started = Instant::now();

    match iteration(ctx) {
        Ok(()) => {
            ctx.trend(
                names::ITERATION_DURATION,
                started.elapsed().as_secs_f64() * 1_000.0,
            );
            ctx.count(names::ITERATIONS, 1);
            IterationFlow::Continue
        }
        Err(e) if e.is::<InterruptedError>() => {
            ctx.count(names::ITERATIONS_ABORTED, 1);
            IterationFlow::Continue
        }
        Err(e) if e.is::<VuBailError>() => {
            log::info!(
                "VU {} of scenario {} bailed out: {e}",
                ctx.vu_id(),
                ctx.scenario()
            );
            IterationFlow::Retire
        }
        Err(e) => {
            log::warn!(
                "Iteration {} failed (scenario {}, vu {}): {e:?}",
                ctx.iteration(),
                ctx.scenario(),
                ctx.vu_id()
            );
            ctx.count(names::ITERATION_ERRORS, 1);
            IterationFlow::Continue
        }
    }
}

fn run_setup<RV: UserValuesConstraint, V: UserValuesConstraint>(
    ctx: &mut VuContext<RV, V>,
    hooks: &VuHooks<RV, V>,
    stats: &ScenarioStats,
) -> bool {
    stats.vus_started.fetch_add(1, Ordering::SeqCst);
    if let Some(setup) = hooks.setup {
        if let Err(e) = setup(ctx) {
            log::error!(
                "VU setup failed (scenario {}, vu {}): {e:?}",
                ctx.scenario(),
                ctx.vu_id()
            );
            return false;
        }
    }
    stats.vus_setup_ok.fetch_add(1, Ordering::SeqCst);
    true
}

fn run_teardown<RV: UserValuesConstraint, V: UserValuesConstraint>(
    ctx: &mut VuContext<RV, V>,
    hooks: &VuHooks<RV, V>,
) {
    if let Some(teardown) = hooks.teardown {
        if let Err(e) = teardown(ctx) {
            log::error!(
                "VU teardown failed (scenario {}, vu {}): {e:?}",
                ctx.scenario(),
                ctx.vu_id()
            );
        }
    }
}

/// Thread body for a closed-workload VU: iterate back-to-back while admitted by the gate.
pub(crate) fn closed_vu_loop<RV: UserValuesConstraint, V: UserValuesConstraint>(
    mut ctx: VuContext<RV, V>,
    gate: Arc<ClosedGate>,
    hooks: VuHooks<RV, V>,
    stats: Arc<ScenarioStats>,
) {
    if !run_setup(&mut ctx, &hooks, &stats) {
        return;
    }

    let vu_index = ctx.vu_id();
    while gate.wait_admitted(vu_index, ctx.shutdown_listener()) {
        if let IterationFlow::Retire = run_one_iteration(&mut ctx, hooks.iteration) {
            break;
        }
    }

    run_teardown(&mut ctx, &hooks);
}

/// Thread body for an open-workload VU: iterate once per start claimed from the pool.
pub(crate) fn open_vu_loop<RV: UserValuesConstraint, V: UserValuesConstraint>(
    mut ctx: VuContext<RV, V>,
    pool: Arc<OpenPool>,
    hooks: VuHooks<RV, V>,
    stats: Arc<ScenarioStats>,
) {
    if !run_setup(&mut ctx, &hooks, &stats) {
        return;
    }

    while pool.next_start(ctx.shutdown_listener()) {
        if let IterationFlow::Retire = run_one_iteration(&mut ctx, hooks.iteration) {
            break;
        }
    }

    run_teardown(&mut ctx, &hooks);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;

    use slipstream_core::prelude::ShutdownHandle;
    use slipstream_metrics::prelude::{MetricKey, MetricStore, MetricSummary};

    use crate::context::RunnerContext;
    use crate::io_executor::IoExecutor;

    use super::*;

    fn test_vu_context() -> VuContext<(), ()> {
        let io = Arc::new(IoExecutor::new().unwrap());
        let store = Arc::new(MetricStore::new());
        let shutdown = ShutdownHandle::new();
        let listener = shutdown.new_listener();
        let runner = Arc::new(RunnerContext::<()>::new(io, store, shutdown));
        VuContext::new(
            Arc::from("s"),
            0,
            runner,
            listener,
            Arc::new(AtomicU64::new(0)),
        )
    }

    fn counter_total(store: &MetricStore, name: &str) -> u64 {
        match store.snapshot().get(&MetricKey::global(name)) {
            Some(MetricSummary::Counter { total }) => *total,
            _ => 0,
        }
    }

    #[test]
    fn successful_iteration_records_duration_and_count() {
        let mut ctx = test_vu_context();
        assert!(matches!(
            run_one_iteration(&mut ctx, |_| Ok(())),
            IterationFlow::Continue
        ));

        let store = ctx.runner_context().store().clone();
        assert_eq!(counter_total(&store, names::ITERATIONS), 1);
        assert!(store
            .snapshot()
            .contains_key(&MetricKey::global(names::ITERATION_DURATION)));
    }

    #[test]
    fn failed_iteration_is_counted_but_does_not_retire() {
        let mut ctx = test_vu_context();
        assert!(matches!(
            run_one_iteration(&mut ctx, |_| Err(anyhow::anyhow!("connection refused"))),
            IterationFlow::Continue
        ));

        let store = ctx.runner_context().store().clone();
        assert_eq!(counter_total(&store, names::ITERATION_ERRORS), 1);
        assert_eq!(counter_total(&store, names::ITERATIONS), 0);
    }

    #[test]
    fn interrupted_iteration_is_recorded_as_aborted() {
        let mut ctx = test_vu_context();
        assert!(matches!(
            run_one_iteration(&mut ctx, |_| Err(anyhow::anyhow!(
                InterruptedError::default()
            ))),
            IterationFlow::Continue
        ));

        let store = ctx.runner_context().store().clone();
        assert_eq!(counter_total(&store, names::ITERATIONS_ABORTED), 1);
        assert_eq!(counter_total(&store, names::ITERATION_ERRORS), 0);
    }

    #[test]
    fn bail_retires_the_vu() {
        let mut ctx = test_vu_context();
        assert!(matches!(
            run_one_iteration(&mut ctx, |_| Err(anyhow::anyhow!(VuBailError::default()))),
            IterationFlow::Retire
        ));
    }

    #[test]
    fn all_setups_failed_requires_at_least_one_start() {
        let stats = ScenarioStats::default();
        assert!(!stats.all_setups_failed());

        stats.vus_started.fetch_add(1, Ordering::SeqCst);
        assert!(stats.all_setups_failed());

        stats.vus_setup_ok.fetch_add(1, Ordering::SeqCst);
        assert!(!stats.all_setups_failed());
    }
}
