use std::time::Duration;

/// A timed linear ramp segment: the target (VU count or arrival rate) is reached by the end of
/// the stage, starting from the previous stage's target.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stage {
    pub duration: Duration,
    pub target: f64,
}

impl Stage {
    pub fn new(duration: Duration, target: f64) -> Self {
        Self { duration, target }
    }
}

/// The timing algorithm for one scenario.
///
/// Constant/ramping VU executors model a closed workload: a VU starts its next iteration only
/// after the previous one completes. The arrival-rate executors model an open workload:
/// iterations are started on schedule regardless of how long each one takes, and arrivals that
/// find the pool saturated at `max_vus` are dropped and counted.
#[derive(Clone, Debug)]
pub enum ExecutorConfig {
    ConstantVus {
        vus: usize,
        duration: Duration,
    },
    RampingVus {
        start_vus: usize,
        stages: Vec<Stage>,
    },
    ConstantArrivalRate {
        /// Iteration starts per `time_unit`.
        rate: f64,
        time_unit: Duration,
        duration: Duration,
        pre_allocated_vus: usize,
        max_vus: usize,
    },
    RampingArrivalRate {
        start_rate: f64,
        time_unit: Duration,
        stages: Vec<Stage>,
        pre_allocated_vus: usize,
        max_vus: usize,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("scenario '{0}' has a stage with zero duration")]
    ZeroDurationStage(String),
    #[error("scenario '{0}' has no stages")]
    NoStages(String),
    #[error("scenario '{0}' has zero VUs")]
    ZeroVus(String),
    #[error("scenario '{0}' has a zero duration")]
    ZeroDuration(String),
    #[error("scenario '{0}' has a non-positive arrival rate")]
    NonPositiveRate(String),
    #[error("scenario '{0}' has max_vus of zero")]
    ZeroMaxVus(String),
    #[error("scenario '{0}' pre-allocates more VUs than max_vus")]
    PreAllocatedExceedsMax(String),
    #[error("scenario '{0}' has a zero time unit")]
    ZeroTimeUnit(String),
    #[error("scenario '{0}' has no iteration hook")]
    NoIterationHook(String),
    #[error("scenario name '{0}' is used more than once in this run")]
    DuplicateScenario(String),
}

impl ExecutorConfig {
    /// Rejects invalid configurations before any traffic is generated.
    pub(crate) fn validate(&self, scenario: &str) -> Result<(), ConfigError> {
        let name = || scenario.to_string();
        match self {
            ExecutorConfig::ConstantVus { vus, duration } => {
                if *vus == 0 {
                    return Err(ConfigError::ZeroVus(name()));
                }
                if duration.is_zero() {
                    return Err(ConfigError::ZeroDuration(name()));
                }
            }
            ExecutorConfig::RampingVus { stages, .. } => {
                validate_stages(scenario, stages)?;
            }
            ExecutorConfig::ConstantArrivalRate {
                rate,
                time_unit,
                duration,
                pre_allocated_vus,
                max_vus,
            } => {
                if *rate <= 0.0 {
                    return Err(ConfigError::NonPositiveRate(name()));
                }
                if time_unit.is_zero() {
                    return Err(ConfigError::ZeroTimeUnit(name()));
                }
                if duration.is_zero() {
                    return Err(ConfigError::ZeroDuration(name()));
                }
                validate_pool(scenario, *pre_allocated_vus, *max_vus)?;
            }
            ExecutorConfig::RampingArrivalRate {
                start_rate,
                time_unit,
                stages,
                pre_allocated_vus,
                max_vus,
            } => {
                if *start_rate < 0.0 {
                    return Err(ConfigError::NonPositiveRate(name()));
                }
                if time_unit.is_zero() {
                    return Err(ConfigError::ZeroTimeUnit(name()));
                }
                validate_stages(scenario, stages)?;
                validate_pool(scenario, *pre_allocated_vus, *max_vus)?;
            }
        }
        Ok(())
    }

    pub(crate) fn total_duration(&self) -> Duration {
        match self {
            ExecutorConfig::ConstantVus { duration, .. }
            | ExecutorConfig::ConstantArrivalRate { duration, .. } => *duration,
            ExecutorConfig::RampingVus { stages, .. }
            | ExecutorConfig::RampingArrivalRate { stages, .. } => {
                stages.iter().map(|s| s.duration).sum()
            }
        }
    }
}

fn validate_stages(scenario: &str, stages: &[Stage]) -> Result<(), ConfigError> {
    if stages.is_empty() {
        return Err(ConfigError::NoStages(scenario.to_string()));
    }
    if stages.iter().any(|s| s.duration.is_zero()) {
        return Err(ConfigError::ZeroDurationStage(scenario.to_string()));
    }
    Ok(())
}

fn validate_pool(scenario: &str, pre_allocated: usize, max: usize) -> Result<(), ConfigError> {
    if max == 0 {
        return Err(ConfigError::ZeroMaxVus(scenario.to_string()));
    }
    if pre_allocated > max {
        return Err(ConfigError::PreAllocatedExceedsMax(scenario.to_string()));
    }
    Ok(())
}

/// The target-over-time curve of an executor: an initial value followed by linear ramp stages.
/// A bare duration with no stages behaves as a single flat stage at the initial value.
#[derive(Clone, Debug)]
pub(crate) struct Timeline {
    start: f64,
    stages: Vec<Stage>,
}

impl Timeline {
    pub(crate) fn new(start: f64, stages: Vec<Stage>) -> Self {
        Self { start, stages }
    }

    pub(crate) fn flat(value: f64, duration: Duration) -> Self {
        Self {
            start: value,
            stages: vec![Stage::new(duration, value)],
        }
    }

    pub(crate) fn for_config(config: &ExecutorConfig) -> Self {
        match config {
            ExecutorConfig::ConstantVus { vus, duration } => {
                Self::flat(*vus as f64, *duration)
            }
            ExecutorConfig::RampingVus { start_vus, stages } => {
                Self::new(*start_vus as f64, stages.clone())
            }
            ExecutorConfig::ConstantArrivalRate { rate, duration, .. } => {
                Self::flat(*rate, *duration)
            }
            ExecutorConfig::RampingArrivalRate {
                start_rate, stages, ..
            } => Self::new(*start_rate, stages.clone()),
        }
    }

    pub(crate) fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// Linear interpolation between stage boundary targets. Clamps to the final target past
    /// the end of the timeline.
    pub(crate) fn target_at(&self, elapsed: Duration) -> f64 {
        let mut from = self.start;
        let mut offset = Duration::ZERO;

        for stage in &self.stages {
            let end = offset + stage.duration;
            if elapsed < end {
                let t = (elapsed - offset).as_secs_f64() / stage.duration.as_secs_f64();
                return from + (stage.target - from) * t;
            }
            from = stage.target;
            offset = end;
        }

        from
    }
}

/// Converts a continuous arrival rate into whole iteration starts per driver tick, carrying
/// the fractional remainder across ticks so the long-term average is preserved.
pub(crate) fn arrivals_for_tick(rate_per_sec: f64, tick: Duration, fractional: &mut f64) -> u64 {
    let due = rate_per_sec.max(0.0) * tick.as_secs_f64() + *fractional;
    let whole = due.floor();
    *fractional = due - whole;
    whole as u64
}
