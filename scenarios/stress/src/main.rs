use std::time::Duration;

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

/// Sign up, log in and start a measurement, carrying the token between steps.
fn full_flow(ctx: &mut VuContext<(), HttpContext>) -> HookResult {
    let driver = ctx
        .get()
        .driver
        .clone()
        .context("HTTP driver not initialised")?;
    let vu = ctx.vu_id();
    let email = random_email();
    let password = random_password();

    let register = ctx.execute(driver.invoke(
        HttpRequest::post("/api/v1/auth/register").json(&serde_json::json!({
            "email": email,
            "password": password,
            "name": format!("Stress-{vu}"),
        }))?,
    ))?;
    ctx.record_request(&register);
    let registered = ctx.check("registered", register.error.is_none() && register.status < 400);
    ctx.rate("errors", !registered);

    ctx.pause(Duration::from_millis(200))?;

    let login = ctx.execute(driver.invoke(
        HttpRequest::post("/api/v1/auth/login").json(&serde_json::json!({
            "email": email,
            "password": password,
        }))?,
    ))?;
    ctx.record_request(&login);
    let logged_in = ctx.check("logged in", login.status == 200);
    if !logged_in {
        // Without a token the rest of the flow cannot be exercised this iteration.
        ctx.rate("errors", true);
        return Ok(());
    }

    let body: Option<serde_json::Value> = serde_json::from_slice(&login.payload).ok();
    let Some(token) = body
        .as_ref()
        .and_then(|b| b["access_token"].as_str())
        .map(str::to_string)
    else {
        return Ok(());
    };

    ctx.pause(Duration::from_millis(200))?;

    let session = ctx.execute(driver.invoke(
        HttpRequest::post("/api/v1/measurement/sessions")
            .json(&serde_json::json!({
                "device_id": format!("MPK-STRESS-{vu}"),
                "cartridge_id": "CART-GLU-001",
                "user_id": format!("user-{vu}"),
            }))?
            .bearer(&token)?,
    ))?;
    ctx.record_request(&session);
    let session_started = ctx.check(
        "session started",
        session.error.is_none() && session.status < 400,
    );
    ctx.rate("errors", !session_started);

    ctx.pause(Duration::from_secs(1))?;
    Ok(())
}

fn main() -> SlipstreamResult<()> {
    let cli = init();

    // Push well past the expected capacity, hold, then ramp down to watch recovery.
    let scenario = ScenarioDefinitionBuilder::<(), HttpContext>::new(
        "stress",
        ExecutorConfig::RampingVus {
            start_vus: 0,
            stages: vec![
                Stage::new(Duration::from_secs(120), 50.0),
                Stage::new(Duration::from_secs(180), 200.0),
                Stage::new(Duration::from_secs(120), 500.0),
                Stage::new(Duration::from_secs(60), 500.0),
                Stage::new(Duration::from_secs(120), 0.0),
            ],
        },
    )
    .use_vu_setup(setup_vu)
    .use_iteration(full_flow);

    let report = run(TestRun::new(cli)
        .with_scenario(scenario)
        .with_threshold(Threshold::parse(names::REQUEST_DURATION, "p(95)<2000")?)
        .with_threshold(Threshold::parse(names::REQUEST_FAILED, "rate<0.10")?)
        .with_threshold(Threshold::parse("errors", "rate<0.15")?))?;

    if !report.passed() {
        std::process::exit(1);
    }
    Ok(())
}
