use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use slipstream_runner::prelude::{
    ExecutorConfig, HookResult, MetricSummary, RunReport, RunnerContext, ScenarioCli,
    ScenarioDefinitionBuilder, Stage, TestRun, Threshold, VuBailError, VuContext, run,
};

fn sample_cli() -> ScenarioCli {
    ScenarioCli {
        duration: None,
        no_progress: true,
        summary_json: None,
    }
}

fn counter(report: &RunReport, key: &str) -> u64 {
    match report.metrics.get(key) {
        Some(MetricSummary::Counter { total }) => *total,
        _ => 0,
    }
}

#[test]
fn constant_vus_bounds_concurrency_and_counts_iterations() {
    static ACTIVE: AtomicUsize = AtomicUsize::new(0);
    static MAX_ACTIVE: AtomicUsize = AtomicUsize::new(0);

    fn iteration(ctx: &mut VuContext<(), ()>) -> HookResult {
        let now = ACTIVE.fetch_add(1, Ordering::SeqCst) + 1;
        MAX_ACTIVE.fetch_max(now, Ordering::SeqCst);
        ctx.pause(Duration::from_millis(10))?;
        ACTIVE.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    let scenario = ScenarioDefinitionBuilder::<(), ()>::new(
        "constant_small",
        ExecutorConfig::ConstantVus {
            vus: 2,
            duration: Duration::from_millis(500),
        },
    )
    .use_iteration(iteration);

    let report = run(TestRun::new(sample_cli()).with_scenario(scenario)).unwrap();

    assert!(report.passed());
    assert!(MAX_ACTIVE.load(Ordering::SeqCst) <= 2);
    assert!(counter(&report, "iterations") > 0);
    assert!(counter(&report, "iterations{scenario:constant_small}") > 0);
}

#[test]
fn ramping_vus_stays_within_the_stage_target() {
    static ACTIVE: AtomicUsize = AtomicUsize::new(0);
    static MAX_ACTIVE: AtomicUsize = AtomicUsize::new(0);

    fn iteration(ctx: &mut VuContext<(), ()>) -> HookResult {
        let now = ACTIVE.fetch_add(1, Ordering::SeqCst) + 1;
        MAX_ACTIVE.fetch_max(now, Ordering::SeqCst);
        ctx.pause(Duration::from_millis(5))?;
        ACTIVE.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    let scenario = ScenarioDefinitionBuilder::<(), ()>::new(
        "ramp",
        ExecutorConfig::RampingVus {
            start_vus: 0,
            stages: vec![Stage::new(Duration::from_millis(400), 4.0)],
        },
    )
    .use_iteration(iteration);

    let report = run(TestRun::new(sample_cli()).with_scenario(scenario)).unwrap();

    assert!(report.passed());
    let max_active = MAX_ACTIVE.load(Ordering::SeqCst);
    assert!((1..=4).contains(&max_active), "max concurrency {max_active}");
    assert!(counter(&report, "iterations") > 0);
}

#[test]
fn global_setup_error_propagates() {
    fn setup(_ctx: &mut RunnerContext<()>) -> HookResult {
        Err(anyhow::anyhow!("backend unreachable"))
    }

    fn iteration(_ctx: &mut VuContext<(), ()>) -> HookResult {
        Ok(())
    }

    let scenario = ScenarioDefinitionBuilder::<(), ()>::new(
        "never_runs",
        ExecutorConfig::ConstantVus {
            vus: 1,
            duration: Duration::from_secs(5),
        },
    )
    .use_iteration(iteration);

    let result = run(TestRun::new(sample_cli())
        .with_scenario(scenario)
        .use_setup(setup));

    let err = result.unwrap_err();
    assert!(format!("{err:#}").contains("backend unreachable"));
}

#[test]
fn vu_setup_failure_for_every_vu_fails_the_run() {
    fn setup_vu(_ctx: &mut VuContext<(), ()>) -> HookResult {
        Err(anyhow::anyhow!("login rejected"))
    }

    fn iteration(_ctx: &mut VuContext<(), ()>) -> HookResult {
        Ok(())
    }

    let scenario = ScenarioDefinitionBuilder::<(), ()>::new(
        "all_setups_fail",
        ExecutorConfig::ConstantVus {
            vus: 2,
            duration: Duration::from_millis(300),
        },
    )
    .use_vu_setup(setup_vu)
    .use_iteration(iteration);

    let report = run(TestRun::new(sample_cli()).with_scenario(scenario)).unwrap();

    assert!(!report.passed());
    assert!(report.fail_reason().unwrap().contains("setup failed"));
    assert_eq!(counter(&report, "iterations"), 0);
}

#[test]
fn iteration_errors_are_counted_without_retiring_the_vu() {
    static SEQ: AtomicUsize = AtomicUsize::new(0);

    fn iteration(ctx: &mut VuContext<(), ()>) -> HookResult {
        let seq = SEQ.fetch_add(1, Ordering::SeqCst);
        ctx.pause(Duration::from_millis(5))?;
        if seq % 2 == 0 {
            return Err(anyhow::anyhow!("connection reset"));
        }
        Ok(())
    }

    let scenario = ScenarioDefinitionBuilder::<(), ()>::new(
        "flaky",
        ExecutorConfig::ConstantVus {
            vus: 1,
            duration: Duration::from_millis(400),
        },
    )
    .use_iteration(iteration);

    let report = run(TestRun::new(sample_cli()).with_scenario(scenario)).unwrap();

    // Errors are diagnostic; without a threshold on them the run still passes.
    assert!(report.passed());
    assert!(counter(&report, "iterations") > 0);
    assert!(counter(&report, "iteration_errors") > 0);
}

#[test]
fn bailing_vu_retires_without_failing_the_run() {
    fn iteration(ctx: &mut VuContext<(), ()>) -> HookResult {
        if ctx.vu_id() == 0 {
            return Err(anyhow::anyhow!(VuBailError::default()));
        }
        ctx.pause(Duration::from_millis(5))?;
        Ok(())
    }

    let scenario = ScenarioDefinitionBuilder::<(), ()>::new(
        "one_bails",
        ExecutorConfig::ConstantVus {
            vus: 2,
            duration: Duration::from_millis(300),
        },
    )
    .use_iteration(iteration);

    let report = run(TestRun::new(sample_cli()).with_scenario(scenario)).unwrap();

    assert!(report.passed());
    assert!(counter(&report, "iterations") > 0);
}

#[test]
fn breached_abort_threshold_stops_the_run_early() {
    fn iteration(ctx: &mut VuContext<(), ()>) -> HookResult {
        ctx.rate("login_failures", true);
        ctx.pause(Duration::from_millis(20))?;
        Ok(())
    }

    let scenario = ScenarioDefinitionBuilder::<(), ()>::new(
        "hopeless",
        ExecutorConfig::ConstantVus {
            vus: 1,
            duration: Duration::from_secs(30),
        },
    )
    .use_iteration(iteration)
    .with_threshold(
        Threshold::parse("login_failures", "rate<0.5")
            .unwrap()
            .abort_on_fail(),
    );

    let started = Instant::now();
    let report = run(TestRun::new(sample_cli()).with_scenario(scenario)).unwrap();

    // The evaluator checks every couple of seconds, so the run ends long before 30s.
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!report.passed());
    assert!(report.aborted_by_threshold);
}

#[test]
fn saturated_arrival_pool_drops_iterations() {
    fn iteration(_ctx: &mut VuContext<(), ()>) -> HookResult {
        std::thread::sleep(Duration::from_millis(100));
        Ok(())
    }

    let scenario = ScenarioDefinitionBuilder::<(), ()>::new(
        "overloaded",
        ExecutorConfig::ConstantArrivalRate {
            rate: 50.0,
            time_unit: Duration::from_secs(1),
            duration: Duration::from_millis(700),
            pre_allocated_vus: 1,
            max_vus: 1,
        },
    )
    .use_iteration(iteration);

    let report = run(TestRun::new(sample_cli()).with_scenario(scenario)).unwrap();

    // A single 10-iterations-per-second VU cannot absorb 50/s.
    assert!(report.passed());
    assert!(counter(&report, "dropped_iterations") > 0);
    assert!(counter(&report, "iterations") > 0);
}

#[test]
fn sustainable_arrival_rate_drops_nothing() {
    fn iteration(_ctx: &mut VuContext<(), ()>) -> HookResult {
        Ok(())
    }

    let scenario = ScenarioDefinitionBuilder::<(), ()>::new(
        "comfortable",
        ExecutorConfig::ConstantArrivalRate {
            rate: 20.0,
            time_unit: Duration::from_secs(1),
            duration: Duration::from_millis(700),
            pre_allocated_vus: 5,
            max_vus: 20,
        },
    )
    .use_iteration(iteration);

    let report = run(TestRun::new(sample_cli()).with_scenario(scenario)).unwrap();

    // Instant iterations with pool headroom: every arrival finds a VU.
    assert!(report.passed());
    assert_eq!(counter(&report, "dropped_iterations"), 0);
    assert!(counter(&report, "iterations") > 0);
}

#[test]
fn cli_duration_drains_the_run_early() {
    fn iteration(ctx: &mut VuContext<(), ()>) -> HookResult {
        ctx.pause(Duration::from_millis(10))?;
        Ok(())
    }

    let scenario = ScenarioDefinitionBuilder::<(), ()>::new(
        "long_planned",
        ExecutorConfig::ConstantVus {
            vus: 1,
            duration: Duration::from_secs(60),
        },
    )
    .use_iteration(iteration);

    let cli = ScenarioCli {
        duration: Some(1),
        ..sample_cli()
    };

    let started = Instant::now();
    let report = run(TestRun::new(cli).with_scenario(scenario)).unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(report.passed());
    assert!(counter(&report, "iterations") > 0);
}

#[test]
fn duplicate_scenario_names_are_rejected() {
    fn iteration(_ctx: &mut VuContext<(), ()>) -> HookResult {
        Ok(())
    }

    let executor = ExecutorConfig::ConstantVus {
        vus: 1,
        duration: Duration::from_secs(1),
    };

    let result = run(TestRun::new(sample_cli())
        .with_scenario(
            ScenarioDefinitionBuilder::<(), ()>::new("dup", executor.clone())
                .use_iteration(iteration),
        )
        .with_scenario(
            ScenarioDefinitionBuilder::<(), ()>::new("dup", executor).use_iteration(iteration),
        ));

    assert!(result
        .unwrap_err()
        .to_string()
        .contains("used more than once"));
}
