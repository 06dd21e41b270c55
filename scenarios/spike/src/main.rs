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

/// The shortest realistic flow, so spikes translate directly into request pressure.
fn signup_and_login(ctx: &mut VuContext<(), HttpContext>) -> HookResult {
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
            "name": format!("Spike-{vu}"),
        }))?,
    ))?;
    ctx.record_request(&register);
    let registered = ctx.check("registered", register.error.is_none() && register.status < 400);
    ctx.rate("errors", !registered);

    ctx.pause(Duration::from_millis(100))?;

    let login = ctx.execute(driver.invoke(
        HttpRequest::post("/api/v1/auth/login").json(&serde_json::json!({
            "email": email,
            "password": password,
        }))?,
    ))?;
    ctx.record_request(&login);
    let logged_in = ctx.check("logged in", login.status == 200);
    ctx.rate("errors", !logged_in);

    ctx.pause(Duration::from_millis(500))?;
    Ok(())
}

fn main() -> SlipstreamResult<()> {
    let cli = init();

    // Two sharp spikes with recovery windows between them.
    let scenario = ScenarioDefinitionBuilder::<(), HttpContext>::new(
        "spike",
        ExecutorConfig::RampingVus {
            start_vus: 0,
            stages: vec![
                Stage::new(Duration::from_secs(30), 20.0),
                Stage::new(Duration::from_secs(10), 200.0),
                Stage::new(Duration::from_secs(30), 20.0),
                Stage::new(Duration::from_secs(10), 200.0),
                Stage::new(Duration::from_secs(30), 20.0),
                Stage::new(Duration::from_secs(30), 0.0),
            ],
        },
    )
    .use_vu_setup(setup_vu)
    .use_iteration(signup_and_login);

    let report = run(TestRun::new(cli)
        .with_scenario(scenario)
        .with_threshold(Threshold::parse(names::REQUEST_DURATION, "p(95)<3000")?)
        .with_threshold(Threshold::parse(names::REQUEST_FAILED, "rate<0.15")?))?;

    if !report.passed() {
        std::process::exit(1);
    }
    Ok(())
}
