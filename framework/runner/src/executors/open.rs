use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use slipstream_metrics::prelude::names;

use crate::config::{arrivals_for_tick, Timeline};
use crate::context::UserValuesConstraint;
use crate::scheduler::{Dispatch, OpenPool};
use crate::vu::open_vu_loop;

use super::{join_vus, ScenarioRun, TICK};

/// Open-workload driver: starts iterations on the arrival-rate schedule, independent of how
/// long each iteration takes. Pre-allocated VUs are spawned up front; the pool grows on demand
/// up to `max_vus`, and arrivals beyond that are dropped and counted so the report shows the
/// target rate was not sustainable.
pub(crate) fn drive<RV: UserValuesConstraint, V: UserValuesConstraint>(
    run: &ScenarioRun<RV, V>,
    timeline: Timeline,
    time_unit: Duration,
    pre_allocated_vus: usize,
    max_vus: usize,
) {
    let pool = Arc::new(OpenPool::new(max_vus));
    let listener = run.runner.shutdown_handle().new_listener();
    let total = timeline.total_duration();

    let mut vu_threads: Vec<JoinHandle<()>> = Vec::new();
    for _ in 0..pre_allocated_vus {
        if !pool.reserve() {
            break;
        }
        match spawn_vu(run, vu_threads.len(), pool.clone()) {
            Ok(handle) => vu_threads.push(handle),
            Err(e) => {
                log::error!("Failed to spawn VU thread for scenario {}: {e}", run.name);
                break;
            }
        }
    }

    let started = Instant::now();
    let mut fractional = 0.0;
    // Fixed-cadence ticks; sleeping until the next boundary keeps the offered rate honest even
    // when a tick's dispatch work takes measurable time.
    let mut next_tick = started + TICK;

    loop {
        let elapsed = started.elapsed();
        if listener.should_stop() || elapsed >= total {
            break;
        }

        let rate_per_sec = timeline.target_at(elapsed) / time_unit.as_secs_f64();
        for _ in 0..arrivals_for_tick(rate_per_sec, TICK, &mut fractional) {
            match pool.dispatch() {
                Dispatch::Started => {}
                Dispatch::Grow => match spawn_vu(run, vu_threads.len(), pool.clone()) {
                    Ok(handle) => vu_threads.push(handle),
                    Err(e) => {
                        log::error!("Failed to spawn VU thread for scenario {}: {e}", run.name);
                    }
                },
                Dispatch::Dropped => {
                    run.runner
                        .store()
                        .counter(names::DROPPED_ITERATIONS, Some(&run.name), 1);
                }
            }
        }

        let now = Instant::now();
        if next_tick > now {
            std::thread::sleep(next_tick - now);
        }
        next_tick += TICK;
    }

    pool.retire();
    join_vus(&run.name, vu_threads);
}

fn spawn_vu<RV: UserValuesConstraint, V: UserValuesConstraint>(
    run: &ScenarioRun<RV, V>,
    vu_id: usize,
    pool: Arc<OpenPool>,
) -> std::io::Result<JoinHandle<()>> {
    let ctx = run.vu_context(vu_id);
    let hooks = run.hooks;
    let stats = run.stats.clone();
    std::thread::Builder::new()
        .name(format!("{}-vu-{vu_id}", run.name))
        .spawn(move || open_vu_loop(ctx, pool, hooks, stats))
}
