use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use slipstream_core::prelude::ShutdownHandle;
use slipstream_metrics::prelude::{MetricStore, RunReport, Threshold};

use crate::cli::ScenarioCli;
use crate::config::ConfigError;
use crate::context::{RunnerContext, UserValuesConstraint};
use crate::definition::{HookResult, ScenarioDefinition, ScenarioDefinitionBuilder};
use crate::executors::{self, ScenarioRun};
use crate::io_executor::IoExecutor;
use crate::progress::start_progress;
use crate::vu::{ScenarioStats, VuHooks};

/// Run once before any VU starts, with exclusive access to the runner context. State stored
/// here is visible read-only to every VU.
pub type GlobalHook<RV> = fn(&mut RunnerContext<RV>) -> HookResult;

/// Run once after every scenario has finished, best effort.
pub type GlobalTeardownHook<RV> = fn(Arc<RunnerContext<RV>>) -> HookResult;

/// How often gating thresholds are re-evaluated against live metrics while the run is active.
const EVAL_INTERVAL: Duration = Duration::from_secs(2);

/// A complete test run: one or more scenarios executed concurrently against shared metrics,
/// gated by thresholds.
pub struct TestRun<RV: UserValuesConstraint, V: UserValuesConstraint> {
    cli: ScenarioCli,
    scenarios: Vec<ScenarioDefinitionBuilder<RV, V>>,
    thresholds: Vec<Threshold>,
    setup_fn: Option<GlobalHook<RV>>,
    teardown_fn: Option<GlobalTeardownHook<RV>>,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> TestRun<RV, V> {
    pub fn new(cli: ScenarioCli) -> Self {
        Self {
            cli,
            scenarios: Vec::new(),
            thresholds: Vec::new(),
            setup_fn: None,
            teardown_fn: None,
        }
    }

    pub fn with_scenario(mut self, scenario: ScenarioDefinitionBuilder<RV, V>) -> Self {
        self.scenarios.push(scenario);
        self
    }

    /// Attach a run-level threshold, evaluated against metrics aggregated across scenarios.
    pub fn with_threshold(mut self, threshold: Threshold) -> Self {
        self.thresholds.push(threshold);
        self
    }

    pub fn use_setup(mut self, setup_fn: GlobalHook<RV>) -> Self {
        self.setup_fn = Some(setup_fn);
        self
    }

    pub fn use_teardown(mut self, teardown_fn: GlobalTeardownHook<RV>) -> Self {
        self.teardown_fn = Some(teardown_fn);
        self
    }
}

/// Execute a test run to completion and return the final report.
///
/// A global setup failure is a hard error: no traffic is generated and the error propagates.
/// Everything after that point degrades instead of crashing, so the report is produced even
/// when scenarios misbehave.
pub fn run<RV: UserValuesConstraint, V: UserValuesConstraint>(
    test: TestRun<RV, V>,
) -> anyhow::Result<RunReport> {
    let mut definitions: Vec<ScenarioDefinition<RV, V>> = Vec::new();
    let mut names = HashSet::new();
    for builder in test.scenarios {
        let definition = builder.build()?;
        if !names.insert(definition.name.clone()) {
            return Err(ConfigError::DuplicateScenario(definition.name).into());
        }
        definitions.push(definition);
    }
    if definitions.is_empty() {
        anyhow::bail!("a test run needs at least one scenario");
    }

    log::info!(
        "Running scenarios: {}",
        definitions
            .iter()
            .map(|d| d.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let io = Arc::new(IoExecutor::new()?);
    let shutdown = ShutdownHandle::new();
    let store = Arc::new(MetricStore::new());

    // Ctrl-C hard-aborts the run; the report is still produced from whatever was recorded.
    {
        let handle = shutdown.clone();
        io.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("Received Ctrl-C, aborting run");
                handle.abort();
            }
        });
    }

    let mut runner_context = RunnerContext::new(io.clone(), store.clone(), shutdown.clone());
    if let Some(setup_fn) = test.setup_fn {
        setup_fn(&mut runner_context).context("Global setup failed")?;
    }
    let runner_context = Arc::new(runner_context);

    // Scenario-level thresholds were scoped during build; run-level ones stay as written.
    let mut thresholds = test.thresholds;
    for definition in &definitions {
        thresholds.extend(definition.thresholds.iter().cloned());
    }

    let planned = definitions
        .iter()
        .map(|d| d.executor.total_duration())
        .max()
        .unwrap_or_default();
    let deadline = test.cli.duration.map(Duration::from_secs).unwrap_or(planned);

    if !test.cli.no_progress {
        start_progress(deadline, shutdown.new_listener());
    }

    // Drain the run when the deadline fires, letting in-flight iterations complete.
    {
        let handle = shutdown.clone();
        io.spawn(async move {
            tokio::time::sleep(deadline).await;
            handle.drain();
        });
    }

    let aborted_by_threshold = Arc::new(AtomicBool::new(false));
    let evaluator = start_threshold_evaluator(
        store.clone(),
        thresholds.clone(),
        shutdown.clone(),
        aborted_by_threshold.clone(),
    )?;

    let started = Instant::now();
    let mut scenario_stats = Vec::new();
    let mut drivers = Vec::new();
    for definition in definitions {
        let stats = Arc::new(ScenarioStats::default());
        scenario_stats.push((definition.name.clone(), stats.clone()));

        let scenario_run = ScenarioRun {
            name: Arc::from(definition.name.as_str()),
            executor: definition.executor,
            hooks: VuHooks {
                setup: definition.setup_vu_fn,
                iteration: definition.iteration_fn,
                teardown: definition.teardown_vu_fn,
            },
            runner: runner_context.clone(),
            stats,
            global_seq: Arc::new(AtomicU64::new(0)),
        };

        drivers.push(
            std::thread::Builder::new()
                .name(format!("{}-driver", definition.name))
                .spawn(move || executors::drive(scenario_run))
                .context("Failed to spawn scenario driver thread")?,
        );
    }

    for driver in drivers {
        driver
            .join()
            .map_err(|e| anyhow::anyhow!("Error joining scenario driver thread: {e:?}"))?;
    }
    let duration_s = started.elapsed().as_secs_f64();

    // All traffic has stopped; release the progress and evaluator threads.
    shutdown.drain();

    if let Some(teardown_fn) = test.teardown_fn {
        // Don't crash the runner if the teardown fails. We still want the reporting to happen
        // cleanly. The hook is documented as best effort.
        if let Err(e) = teardown_fn(runner_context.clone()) {
            log::error!("Teardown failed: {e:?}");
        }
    }

    if evaluator.join().is_err() {
        log::error!("Threshold evaluator thread panicked");
    }

    let snapshot = store.snapshot();
    let verdicts = thresholds.iter().map(|t| t.evaluate(&snapshot)).collect();
    let setup_failures = scenario_stats
        .iter()
        .filter(|(_, stats)| stats.all_setups_failed())
        .map(|(name, _)| name.clone())
        .collect();

    let report = RunReport::new(
        scenario_stats.into_iter().map(|(name, _)| name).collect(),
        duration_s,
        snapshot,
        verdicts,
        setup_failures,
        aborted_by_threshold.load(Ordering::SeqCst),
    );

    report.print_summary();
    if let Some(path) = &test.cli.summary_json {
        report
            .write_json(path)
            .with_context(|| format!("Failed to write summary to {}", path.display()))?;
    }

    Ok(report)
}

/// Periodically evaluates abort-on-fail thresholds against live metrics, stopping the run as
/// soon as one is breached. End-of-run thresholds are only evaluated once traffic stops.
fn start_threshold_evaluator(
    store: Arc<MetricStore>,
    thresholds: Vec<Threshold>,
    shutdown: ShutdownHandle,
    aborted: Arc<AtomicBool>,
) -> anyhow::Result<std::thread::JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("threshold-eval".to_string())
        .spawn(move || {
            let listener = shutdown.new_listener();
            let gating: Vec<&Threshold> = thresholds.iter().filter(|t| t.aborts_run()).collect();
            if gating.is_empty() {
                return;
            }

            loop {
                // Sleep in short slices so a drain is noticed promptly.
                let interval_start = Instant::now();
                while interval_start.elapsed() < EVAL_INTERVAL {
                    if listener.should_stop() {
                        return;
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }

                let snapshot = store.snapshot();
                for threshold in &gating {
                    let verdict = threshold.evaluate(&snapshot);
                    if !verdict.passed {
                        log::error!(
                            "Threshold '{}' on {} breached mid-run (observed {:?}), aborting",
                            verdict.expression,
                            verdict.metric,
                            verdict.observed
                        );
                        aborted.store(true, Ordering::SeqCst);
                        shutdown.abort();
                        return;
                    }
                }
            }
        })
        .context("Failed to spawn threshold evaluator thread")?;
    Ok(handle)
}
