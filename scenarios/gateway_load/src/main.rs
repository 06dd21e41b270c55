use std::time::Duration;

use anyhow::Context;
use slipstream_http::{HttpDriver, HttpRequest};
use slipstream_runner::prelude::*;

#[derive(Debug, Default)]
struct HttpContext {
    driver: Option<HttpDriver>,
}

impl UserValuesConstraint for HttpContext {}

#[derive(Clone, Copy, Debug)]
enum Endpoint {
    Health,
    Auth,
    Devices,
    Measurement,
}

impl Endpoint {
    fn name(self) -> &'static str {
        match self {
            Endpoint::Health => "health",
            Endpoint::Auth => "auth",
            Endpoint::Devices => "devices",
            Endpoint::Measurement => "measurement",
        }
    }

    fn request(self) -> anyhow::Result<HttpRequest> {
        match self {
            Endpoint::Health => Ok(HttpRequest::get("/health")),
            Endpoint::Auth => HttpRequest::post("/api/v1/auth/login").json(&serde_json::json!({
                "email": "test@test.com",
                "password": "test",
            })),
            Endpoint::Devices => Ok(HttpRequest::get("/api/v1/devices")),
            Endpoint::Measurement => Ok(HttpRequest::get("/api/v1/measurement/history")),
        }
    }

    /// The per-endpoint latency metric, where one is tracked.
    fn latency_metric(self) -> Option<&'static str> {
        match self {
            Endpoint::Health => None,
            Endpoint::Auth => Some("auth_endpoint_latency"),
            Endpoint::Devices => Some("device_endpoint_latency"),
            Endpoint::Measurement => Some("measurement_endpoint_latency"),
        }
    }
}

fn setup_vu(ctx: &mut VuContext<(), HttpContext>) -> HookResult {
    ctx.get_mut().driver = Some(HttpDriver::new()?);
    Ok(())
}

/// Hit a random gateway endpoint, the way real traffic spreads across routes.
fn gateway_traffic(ctx: &mut VuContext<(), HttpContext>) -> HookResult {
    let driver = ctx
        .get()
        .driver
        .clone()
        .context("HTTP driver not initialised")?;

    let endpoints = WeightedChoice::new()
        .add(1, Endpoint::Health)
        .add(1, Endpoint::Auth)
        .add(1, Endpoint::Devices)
        .add(1, Endpoint::Measurement);
    let endpoint = *endpoints.choose();

    let outcome = ctx.execute(driver.invoke(endpoint.request()?))?;
    ctx.record_request(&outcome);
    if let Some(metric) = endpoint.latency_metric() {
        ctx.trend(metric, outcome.latency_ms());
    }
    ctx.check(
        &format!("{} responded", endpoint.name()),
        outcome.error.is_none() && outcome.status < 500,
    );

    ctx.pause(Duration::from_millis(100))?;
    Ok(())
}

fn main() -> SlipstreamResult<()> {
    let cli = init();

    let scenario = ScenarioDefinitionBuilder::<(), HttpContext>::new(
        "gateway_ramp",
        ExecutorConfig::RampingArrivalRate {
            start_rate: 10.0,
            time_unit: Duration::from_secs(1),
            stages: vec![
                Stage::new(Duration::from_secs(60), 50.0),
                Stage::new(Duration::from_secs(60), 100.0),
                Stage::new(Duration::from_secs(60), 200.0),
            ],
            pre_allocated_vus: 50,
            max_vus: 300,
        },
    )
    .use_vu_setup(setup_vu)
    .use_iteration(gateway_traffic);

    let report = run(TestRun::new(cli)
        .with_scenario(scenario)
        .with_threshold(Threshold::parse(names::REQUEST_DURATION, "p(95)<300")?)
        .with_threshold(Threshold::parse(names::REQUEST_DURATION, "p(99)<800")?)
        .with_threshold(Threshold::parse(names::REQUEST_FAILED, "rate<0.02")?)
        .with_threshold(Threshold::parse("auth_endpoint_latency", "p(95)<200")?)
        .with_threshold(Threshold::parse("measurement_endpoint_latency", "p(95)<500")?))?;

    if !report.passed() {
        std::process::exit(1);
    }
    Ok(())
}
