use slipstream_metrics::prelude::Threshold;

use crate::config::{ConfigError, ExecutorConfig};
use crate::context::{UserValuesConstraint, VuContext};

pub type HookResult = anyhow::Result<()>;

pub type VuHook<RV, V> = fn(&mut VuContext<RV, V>) -> HookResult;

/// The builder for one named scenario: an executor configuration plus the hooks that define
/// the traffic it generates.
pub struct ScenarioDefinitionBuilder<RV: UserValuesConstraint, V: UserValuesConstraint> {
    /// The name of the scenario, which must be unique within the run.
    ///
    /// Recommended value is `env!("CARGO_PKG_NAME")` for single-scenario binaries.
    name: String,
    executor: ExecutorConfig,
    thresholds: Vec<Threshold>,
    /// Run once per VU before its first iteration. A VU whose setup fails is retired without
    /// ever iterating; if this happens to every VU, the whole run fails with a setup-failure
    /// verdict.
    setup_vu_fn: Option<VuHook<RV, V>>,
    /// The iteration body, run repeatedly by each VU until the executor retires it.
    iteration_fn: Option<VuHook<RV, V>>,
    /// Run once per VU after its last iteration, best effort.
    teardown_vu_fn: Option<VuHook<RV, V>>,
}

pub struct ScenarioDefinition<RV: UserValuesConstraint, V: UserValuesConstraint> {
    pub(crate) name: String,
    pub(crate) executor: ExecutorConfig,
    pub(crate) thresholds: Vec<Threshold>,
    pub(crate) setup_vu_fn: Option<VuHook<RV, V>>,
    pub(crate) iteration_fn: VuHook<RV, V>,
    pub(crate) teardown_vu_fn: Option<VuHook<RV, V>>,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> ScenarioDefinitionBuilder<RV, V> {
    pub fn new(name: &str, executor: ExecutorConfig) -> Self {
        Self {
            name: name.to_string(),
            executor,
            thresholds: Vec::new(),
            setup_vu_fn: None,
            iteration_fn: None,
            teardown_vu_fn: None,
        }
    }

    /// Attach a threshold to this scenario. Unscoped selectors are evaluated against this
    /// scenario's samples only; use run-level thresholds for cross-scenario aggregates.
    pub fn with_threshold(mut self, threshold: Threshold) -> Self {
        self.thresholds.push(threshold);
        self
    }

    pub fn use_vu_setup(mut self, setup_vu_fn: VuHook<RV, V>) -> Self {
        self.setup_vu_fn = Some(setup_vu_fn);
        self
    }

    pub fn use_iteration(mut self, iteration_fn: VuHook<RV, V>) -> Self {
        self.iteration_fn = Some(iteration_fn);
        self
    }

    pub fn use_vu_teardown(mut self, teardown_vu_fn: VuHook<RV, V>) -> Self {
        self.teardown_vu_fn = Some(teardown_vu_fn);
        self
    }

    pub(crate) fn build(self) -> Result<ScenarioDefinition<RV, V>, ConfigError> {
        self.executor.validate(&self.name)?;

        let iteration_fn = self
            .iteration_fn
            .ok_or_else(|| ConfigError::NoIterationHook(self.name.clone()))?;

        let name = self.name;
        let thresholds = self
            .thresholds
            .into_iter()
            .map(|t| t.scope_to(&name))
            .collect();

        Ok(ScenarioDefinition {
            name,
            executor: self.executor,
            thresholds,
            setup_vu_fn: self.setup_vu_fn,
            iteration_fn,
            teardown_vu_fn: self.teardown_vu_fn,
        })
    }
}
