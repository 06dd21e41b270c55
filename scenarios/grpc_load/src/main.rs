//! The target at `GRPC_ADDR` must expose `measurement.v1.MeasurementService`,
//! `device.v1.DeviceService` and the standard `grpc.health.v1.Health` service. Calls are
//! addressed by full service name, so a backend registered under other package names
//! answers every request with UNIMPLEMENTED.

use std::time::Duration;

use anyhow::Context;
use slipstream_grpc::{MessageBuilder, RpcDriver, RpcRequest};
use slipstream_runner::prelude::*;

#[derive(Debug, Default)]
struct GrpcContext {
    driver: Option<RpcDriver>,
}

impl UserValuesConstraint for GrpcContext {}

fn setup_vu(ctx: &mut VuContext<(), GrpcContext>) -> HookResult {
    ctx.get_mut().driver = Some(RpcDriver::new()?);
    Ok(())
}

fn driver(ctx: &VuContext<(), GrpcContext>) -> anyhow::Result<RpcDriver> {
    ctx.get()
        .driver
        .clone()
        .context("gRPC driver not initialised")
}

/// Health/Check against the measurement service, expecting SERVING.
fn health_check(ctx: &mut VuContext<(), GrpcContext>) -> HookResult {
    let driver = driver(ctx)?;

    let request = RpcRequest::new("grpc.health.v1.Health", "Check")
        .message(MessageBuilder::new().string(1, "measurement.v1.MeasurementService").build());
    let outcome = ctx.execute(driver.invoke(request))?;
    ctx.record_request(&outcome);
    ctx.trend("grpc_health_check_duration", outcome.latency_ms());

    // HealthCheckResponse { status = SERVING } encodes to exactly these two bytes.
    let healthy = ctx.check("health status ok", outcome.ok());
    let serving = ctx.check("serving status", outcome.payload.as_ref() == b"\x08\x01");
    ctx.rate("grpc_error_rate", !(healthy && serving));
    Ok(())
}

/// Start a measurement session and complete it with a full set of channel readings.
fn measurement_flow(ctx: &mut VuContext<(), GrpcContext>) -> HookResult {
    let driver = driver(ctx)?;
    let vu = ctx.vu_id();
    let iteration = ctx.iteration();
    let flow_started = std::time::Instant::now();

    let start = RpcRequest::new("measurement.v1.MeasurementService", "StartSession").message(
        MessageBuilder::new()
            .string(1, &format!("device-load-{vu}"))
            .string(2, "0x01")
            .uint(3, 88)
            .build(),
    );
    let start_outcome = ctx.execute(driver.invoke(start))?;
    ctx.record_request(&start_outcome);
    let session_ok = ctx.check("session started", start_outcome.ok());
    ctx.rate("grpc_error_rate", !session_ok);

    if session_ok {
        let mut channels = MessageBuilder::new().string(1, &format!("session-{vu}-{iteration}"));
        for channel_id in 0..88u64 {
            let reading = MessageBuilder::new()
                .uint(1, channel_id)
                .double(2, (channel_id as f64 * 7.3) % 1000.0)
                .double(3, (channel_id as f64 * 1.1) % 100.0)
                .build();
            channels = channels.bytes(2, &reading);
        }

        let end = RpcRequest::new("measurement.v1.MeasurementService", "EndSession")
            .message(channels.build());
        let end_outcome = ctx.execute(driver.invoke(end))?;
        ctx.record_request(&end_outcome);
        ctx.trend(
            "grpc_measurement_duration",
            flow_started.elapsed().as_secs_f64() * 1_000.0,
        );

        let measured = ctx.check("measurement completed", end_outcome.ok());
        let has_values = ctx.check("has corrected values", !end_outcome.payload.is_empty());
        ctx.rate("grpc_error_rate", !(measured && has_values));
    }

    ctx.pause(Duration::from_millis(500))?;
    Ok(())
}

/// Page through the calling user's registered devices.
fn device_query(ctx: &mut VuContext<(), GrpcContext>) -> HookResult {
    let driver = driver(ctx)?;
    let vu = ctx.vu_id();

    let request = RpcRequest::new("device.v1.DeviceService", "GetDevices").message(
        MessageBuilder::new()
            .string(1, &format!("user-load-{vu}"))
            .uint(2, 1)
            .uint(3, 10)
            .build(),
    );
    let outcome = ctx.execute(driver.invoke(request))?;
    ctx.record_request(&outcome);
    ctx.trend("grpc_device_query_duration", outcome.latency_ms());
    let success = ctx.check("device query success", outcome.ok());
    ctx.rate("grpc_error_rate", !success);

    ctx.pause(Duration::from_secs(1))?;
    Ok(())
}

#[derive(Clone, Copy, Debug)]
enum Flow {
    Health,
    Device,
    Measurement,
}

/// Weighted mix of the three call patterns on one arrival schedule.
fn mixed_traffic(ctx: &mut VuContext<(), GrpcContext>) -> HookResult {
    let flows = WeightedChoice::new()
        .add(40, Flow::Health)
        .add(30, Flow::Device)
        .add(30, Flow::Measurement);

    match flows.choose() {
        Flow::Health => health_check(ctx),
        Flow::Device => device_query(ctx),
        Flow::Measurement => measurement_flow(ctx),
    }
}

fn main() -> SlipstreamResult<()> {
    let cli = init();

    let health = ScenarioDefinitionBuilder::<(), GrpcContext>::new(
        "grpc_health",
        ExecutorConfig::ConstantArrivalRate {
            rate: 100.0,
            time_unit: Duration::from_secs(1),
            duration: Duration::from_secs(120),
            pre_allocated_vus: 50,
            max_vus: 200,
        },
    )
    .use_vu_setup(setup_vu)
    .use_iteration(health_check);

    let measurement = ScenarioDefinitionBuilder::<(), GrpcContext>::new(
        "grpc_measurement",
        ExecutorConfig::RampingVus {
            start_vus: 0,
            stages: vec![
                Stage::new(Duration::from_secs(30), 50.0),
                Stage::new(Duration::from_secs(60), 100.0),
                Stage::new(Duration::from_secs(60), 200.0),
                Stage::new(Duration::from_secs(30), 0.0),
            ],
        },
    )
    .use_vu_setup(setup_vu)
    .use_iteration(measurement_flow);

    let device = ScenarioDefinitionBuilder::<(), GrpcContext>::new(
        "grpc_device",
        ExecutorConfig::ConstantVus {
            vus: 30,
            duration: Duration::from_secs(120),
        },
    )
    .use_vu_setup(setup_vu)
    .use_iteration(device_query);

    let mixed = ScenarioDefinitionBuilder::<(), GrpcContext>::new(
        "grpc_mixed",
        ExecutorConfig::RampingArrivalRate {
            start_rate: 10.0,
            time_unit: Duration::from_secs(1),
            stages: vec![
                Stage::new(Duration::from_secs(30), 50.0),
                Stage::new(Duration::from_secs(60), 100.0),
                Stage::new(Duration::from_secs(30), 50.0),
            ],
            pre_allocated_vus: 100,
            max_vus: 300,
        },
    )
    .use_vu_setup(setup_vu)
    .use_iteration(mixed_traffic);

    let report = run(TestRun::new(cli)
        .with_scenario(health)
        .with_scenario(measurement)
        .with_scenario(device)
        .with_scenario(mixed)
        .with_threshold(Threshold::parse("grpc_error_rate", "rate<0.01")?)
        .with_threshold(Threshold::parse("grpc_measurement_duration", "p(95)<500")?)
        .with_threshold(Threshold::parse("grpc_device_query_duration", "p(95)<200")?)
        .with_threshold(Threshold::parse("grpc_health_check_duration", "p(99)<100")?)
        .with_threshold(Threshold::parse(
            "request_duration{scenario:grpc_health}",
            "p(95)<50",
        )?))?;

    if !report.passed() {
        std::process::exit(1);
    }
    Ok(())
}
