use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crate::config::Timeline;
use crate::context::UserValuesConstraint;
use crate::scheduler::ClosedGate;
use crate::vu::closed_vu_loop;

use super::{join_vus, ScenarioRun, TICK};

/// Closed-workload driver: follows the VU-count curve, spawning VU threads lazily as the
/// target rises. VUs above the current target park at the gate between iterations, so ramping
/// down never cancels work in flight.
pub(crate) fn drive<RV: UserValuesConstraint, V: UserValuesConstraint>(
    run: &ScenarioRun<RV, V>,
    timeline: Timeline,
) {
    let gate = Arc::new(ClosedGate::new());
    let listener = run.runner.shutdown_handle().new_listener();
    let total = timeline.total_duration();
    let started = Instant::now();

    let mut vu_threads: Vec<JoinHandle<()>> = Vec::new();

    loop {
        let elapsed = started.elapsed();
        if listener.should_stop() || elapsed >= total {
            break;
        }

        let target = timeline.target_at(elapsed).round() as usize;
        while vu_threads.len() < target {
            match spawn_vu(run, vu_threads.len(), gate.clone()) {
                Ok(handle) => vu_threads.push(handle),
                Err(e) => {
                    log::error!("Failed to spawn VU thread for scenario {}: {e}", run.name);
                    break;
                }
            }
        }
        gate.set_target(target);

        std::thread::sleep(TICK);
    }

    gate.retire();
    join_vus(&run.name, vu_threads);
}

fn spawn_vu<RV: UserValuesConstraint, V: UserValuesConstraint>(
    run: &ScenarioRun<RV, V>,
    vu_id: usize,
    gate: Arc<ClosedGate>,
) -> std::io::Result<JoinHandle<()>> {
    let ctx = run.vu_context(vu_id);
    let hooks = run.hooks;
    let stats = run.stats.clone();
    std::thread::Builder::new()
        .name(format!("{}-vu-{vu_id}", run.name))
        .spawn(move || closed_vu_loop(ctx, gate, hooks, stats))
}
