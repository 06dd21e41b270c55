use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use slipstream_http::{random_email, random_password, HttpDriver, HttpRequest};
use slipstream_runner::prelude::*;

#[derive(Debug, Default)]
struct RunContext {
    /// Minted once in global setup and shared read-only by every VU.
    token: Option<String>,
}

impl UserValuesConstraint for RunContext {}

#[derive(Debug, Default)]
struct HttpContext {
    driver: Option<HttpDriver>,
}

impl UserValuesConstraint for HttpContext {}

/// Register one account and log in, so iterations don't pay the auth cost.
fn setup(ctx: &mut RunnerContext<RunContext>) -> HookResult {
    let driver = HttpDriver::new()?;
    let email = random_email();
    let password = random_password();

    ctx.execute(driver.invoke(
        HttpRequest::post("/api/v1/auth/register").json(&serde_json::json!({
            "email": email,
            "password": password,
            "name": "Measure Test",
        }))?,
    ))?;

    let login = ctx.execute(driver.invoke(
        HttpRequest::post("/api/v1/auth/login").json(&serde_json::json!({
            "email": email,
            "password": password,
        }))?,
    ))?;

    let body: serde_json::Value =
        serde_json::from_slice(&login.payload).context("Login response is not JSON")?;
    ctx.get_mut().token = body["access_token"].as_str().map(str::to_string);
    Ok(())
}

fn setup_vu(ctx: &mut VuContext<RunContext, HttpContext>) -> HookResult {
    ctx.get_mut().driver = Some(HttpDriver::new()?);
    Ok(())
}

/// Start a measurement session, post its readings, then query recent history.
fn measurement_flow(ctx: &mut VuContext<RunContext, HttpContext>) -> HookResult {
    let Some(token) = ctx.runner_context().get().token.clone() else {
        // Setup could not obtain a token; nothing useful to measure.
        return Ok(());
    };
    let driver = ctx
        .get()
        .driver
        .clone()
        .context("HTTP driver not initialised")?;
    let vu = ctx.vu_id();
    let iteration = ctx.iteration();

    let start = ctx.execute(driver.invoke(
        HttpRequest::post("/api/v1/measurement/sessions")
            .json(&serde_json::json!({
                "device_id": format!("MPK-LOAD-{vu}"),
                "cartridge_id": format!("CART-GLU-{}", iteration % 100),
                "user_id": format!("user-load-{vu}"),
            }))?
            .bearer(&token)?,
    ))?;
    ctx.record_request(&start);
    ctx.trend("session_start_duration", start.latency_ms());
    let started = ctx.check("session started", start.status == 200 || start.status == 201);
    ctx.rate("errors", !started);

    ctx.pause(Duration::from_millis(500))?;

    let readings: Vec<f64> = {
        let mut rng = rand::thread_rng();
        (0..88).map(|_| rng.gen_range(0.0..2.0)).collect()
    };
    let (primary_value, confidence) = {
        let mut rng = rand::thread_rng();
        (rng.gen_range(95.0..145.0), rng.gen_range(0.85..1.0))
    };
    let end = ctx.execute(driver.invoke(
        HttpRequest::post("/api/v1/measurement/sessions/end")
            .json(&serde_json::json!({
                "session_id": format!("session-{vu}-{iteration}"),
                "raw_channels": readings,
                "primary_value": primary_value,
                "unit": "mg/dL",
                "confidence": confidence,
            }))?
            .bearer(&token)?,
    ))?;
    ctx.record_request(&end);
    ctx.trend("session_end_duration", end.latency_ms());
    ctx.check("session ended", end.status == 200);

    ctx.pause(Duration::from_millis(300))?;

    let history = ctx.execute(driver.invoke(
        HttpRequest::get("/api/v1/measurement/history?limit=10").bearer(&token)?,
    ))?;
    ctx.record_request(&history);
    ctx.trend("history_query_duration", history.latency_ms());
    ctx.check("history returned", history.status == 200);

    ctx.pause(Duration::from_millis(500))?;
    Ok(())
}

fn main() -> SlipstreamResult<()> {
    let cli = init();

    let scenario = ScenarioDefinitionBuilder::<RunContext, HttpContext>::new(
        "measurement_rate",
        ExecutorConfig::ConstantArrivalRate {
            rate: 50.0,
            time_unit: Duration::from_secs(1),
            duration: Duration::from_secs(60),
            pre_allocated_vus: 100,
            max_vus: 200,
        },
    )
    .use_vu_setup(setup_vu)
    .use_iteration(measurement_flow);

    let report = run(TestRun::new(cli)
        .use_setup(setup)
        .with_scenario(scenario)
        .with_threshold(Threshold::parse(names::REQUEST_DURATION, "p(95)<500")?)
        .with_threshold(Threshold::parse(names::REQUEST_DURATION, "p(99)<1000")?)
        .with_threshold(Threshold::parse(names::REQUEST_FAILED, "rate<0.01")?)
        .with_threshold(Threshold::parse("session_start_duration", "p(95)<500")?)
        .with_threshold(Threshold::parse("session_end_duration", "p(95)<500")?)
        .with_threshold(Threshold::parse("history_query_duration", "p(95)<300")?))?;

    if !report.passed() {
        std::process::exit(1);
    }
    Ok(())
}
