use std::time::{Duration, Instant};

use anyhow::Context;
use slipstream_http::{random_email, random_password, HttpDriver, HttpRequest};
use slipstream_runner::prelude::*;

#[derive(Debug, Default)]
struct HttpContext {
    driver: Option<HttpDriver>,
}

impl UserValuesConstraint for HttpContext {}

fn setup_vu(ctx: &mut VuContext<(), HttpContext>) -> HookResult {
    ctx.get_mut().driver = Some(HttpDriver::new()?);
    Ok(())
}

/// One full user session: sign up, log in, take a measurement, review it, log out.
fn user_session(ctx: &mut VuContext<(), HttpContext>) -> HookResult {
    let driver = ctx
        .get()
        .driver
        .clone()
        .context("HTTP driver not initialised")?;
    let vu = ctx.vu_id();
    let session_started = Instant::now();
    let email = random_email();
    let password = random_password();

    let register = ctx.execute(driver.invoke(
        HttpRequest::post("/api/v1/auth/register").json(&serde_json::json!({
            "email": email,
            "password": password,
            "name": format!("CCU-{vu}"),
        }))?,
    ))?;
    ctx.record_request(&register);

    let login = ctx.execute(driver.invoke(
        HttpRequest::post("/api/v1/auth/login").json(&serde_json::json!({
            "email": email,
            "password": password,
        }))?,
    ))?;
    ctx.record_request(&login);
    ctx.check("logged in", login.status == 200);

    ctx.pause(Duration::from_secs(1))?;

    let session = ctx.execute(driver.invoke(
        HttpRequest::post("/api/v1/measurement/sessions").json(&serde_json::json!({
            "device_id": format!("MPK-CCU-{vu}"),
            "cartridge_id": "CART-GLU-001",
            "user_id": format!("ccu-{vu}"),
        }))?,
    ))?;
    ctx.record_request(&session);

    ctx.pause(Duration::from_secs(2))?;

    let history = ctx.execute(driver.invoke(HttpRequest::get(
        "/api/v1/measurement/history?limit=5",
    )))?;
    ctx.record_request(&history);

    ctx.pause(Duration::from_secs(1))?;

    let logout = ctx.execute(driver.invoke(HttpRequest::post("/api/v1/auth/logout")))?;
    ctx.record_request(&logout);

    ctx.trend(
        "user_session_duration",
        session_started.elapsed().as_secs_f64() * 1_000.0,
    );

    ctx.pause(Duration::from_secs(2))?;
    Ok(())
}

fn main() -> SlipstreamResult<()> {
    let cli = init();

    let scenario = ScenarioDefinitionBuilder::<(), HttpContext>::new(
        "concurrent_users",
        ExecutorConfig::ConstantVus {
            vus: 100,
            duration: Duration::from_secs(300),
        },
    )
    .use_vu_setup(setup_vu)
    .use_iteration(user_session);

    let report = run(TestRun::new(cli)
        .with_scenario(scenario)
        .with_threshold(Threshold::parse(names::REQUEST_DURATION, "p(95)<500")?)
        .with_threshold(Threshold::parse(names::REQUEST_DURATION, "p(99)<1000")?)
        .with_threshold(Threshold::parse(names::REQUEST_FAILED, "rate<0.01")?)
        .with_threshold(Threshold::parse("user_session_duration", "p(95)<10000")?))?;

    if !report.passed() {
        std::process::exit(1);
    }
    Ok(())
}
