mod closed;
mod open;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::{ExecutorConfig, Timeline};
use crate::context::{RunnerContext, UserValuesConstraint, VuContext};
use crate::vu::{ScenarioStats, VuHooks};

/// How often executor driver loops re-evaluate their target curve.
pub(crate) const TICK: Duration = Duration::from_millis(100);

/// Everything an executor driver thread needs to generate one scenario's traffic.
pub(crate) struct ScenarioRun<RV: UserValuesConstraint, V: UserValuesConstraint> {
    pub(crate) name: Arc<str>,
    pub(crate) executor: ExecutorConfig,
    pub(crate) hooks: VuHooks<RV, V>,
    pub(crate) runner: Arc<RunnerContext<RV>>,
    pub(crate) stats: Arc<ScenarioStats>,
    /// Shared iteration sequence across all VUs of this scenario.
    pub(crate) global_seq: Arc<AtomicU64>,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> ScenarioRun<RV, V> {
    pub(crate) fn vu_context(&self, vu_id: usize) -> VuContext<RV, V> {
        VuContext::new(
            self.name.clone(),
            vu_id,
            self.runner.clone(),
            self.runner.shutdown_handle().new_listener(),
            self.global_seq.clone(),
        )
    }
}

/// Drive one scenario to completion. Blocks until every VU thread has finished.
pub(crate) fn drive<RV: UserValuesConstraint, V: UserValuesConstraint>(run: ScenarioRun<RV, V>) {
    let timeline = Timeline::for_config(&run.executor);
    match run.executor {
        ExecutorConfig::ConstantVus { .. } | ExecutorConfig::RampingVus { .. } => {
            closed::drive(&run, timeline)
        }
        ExecutorConfig::ConstantArrivalRate {
            time_unit,
            pre_allocated_vus,
            max_vus,
            ..
        }
        | ExecutorConfig::RampingArrivalRate {
            time_unit,
            pre_allocated_vus,
            max_vus,
            ..
        } => open::drive(&run, timeline, time_unit, pre_allocated_vus, max_vus),
    }
}

pub(crate) fn join_vus(scenario: &str, handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if handle.join().is_err() {
            log::error!("A VU thread of scenario {scenario} panicked");
        }
    }
}
