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

/// Register a fresh account, log in with it, then refresh the issued token.
fn auth_flow(ctx: &mut VuContext<(), HttpContext>) -> HookResult {
    let driver = ctx
        .get()
        .driver
        .clone()
        .context("HTTP driver not initialised")?;
    let email = random_email();
    let password = random_password();

    let register = ctx.execute(driver.invoke(
        HttpRequest::post("/api/v1/auth/register").json(&serde_json::json!({
            "email": email,
            "password": password,
            "name": "Load Test User",
        }))?,
    ))?;
    ctx.record_request(&register);
    ctx.trend("register_duration", register.latency_ms());
    let registered = ctx.check(
        "registered",
        register.status == 200 || register.status == 201,
    );
    ctx.rate("errors", !registered);

    ctx.pause(Duration::from_millis(500))?;

    let login = ctx.execute(driver.invoke(
        HttpRequest::post("/api/v1/auth/login").json(&serde_json::json!({
            "email": email,
            "password": password,
        }))?,
    ))?;
    ctx.record_request(&login);
    ctx.trend("login_duration", login.latency_ms());

    let body: Option<serde_json::Value> = serde_json::from_slice(&login.payload).ok();
    let logged_in = ctx.check("logged in", login.status == 200);
    let has_token = ctx.check(
        "token returned",
        body.as_ref()
            .is_some_and(|b| b["access_token"].as_str().is_some()),
    );
    ctx.rate("errors", !(logged_in && has_token));

    if logged_in {
        // Use the refresh token when the login response carried one.
        if let Some(refresh_token) = body.as_ref().and_then(|b| b["refresh_token"].as_str()) {
            ctx.pause(Duration::from_millis(300))?;

            let refresh = ctx.execute(driver.invoke(
                HttpRequest::post("/api/v1/auth/refresh").json(&serde_json::json!({
                    "refresh_token": refresh_token,
                }))?,
            ))?;
            ctx.record_request(&refresh);
            ctx.check("token refreshed", refresh.status == 200);
        }
    }

    ctx.pause(Duration::from_secs(1))?;
    Ok(())
}

fn main() -> SlipstreamResult<()> {
    let cli = init();

    let constant = ScenarioDefinitionBuilder::<(), HttpContext>::new(
        "constant_auth",
        ExecutorConfig::ConstantVus {
            vus: 10,
            duration: Duration::from_secs(30),
        },
    )
    .use_vu_setup(setup_vu)
    .use_iteration(auth_flow);

    let ramping = ScenarioDefinitionBuilder::<(), HttpContext>::new(
        "ramping_auth",
        ExecutorConfig::RampingVus {
            start_vus: 0,
            stages: vec![
                Stage::new(Duration::from_secs(30), 50.0),
                Stage::new(Duration::from_secs(30), 100.0),
                Stage::new(Duration::from_secs(30), 50.0),
                Stage::new(Duration::from_secs(30), 0.0),
            ],
        },
    )
    .use_vu_setup(setup_vu)
    .use_iteration(auth_flow);

    let report = run(TestRun::new(cli)
        .with_scenario(constant)
        .with_scenario(ramping)
        .with_threshold(Threshold::parse(names::REQUEST_DURATION, "p(95)<200")?)
        .with_threshold(Threshold::parse(names::REQUEST_DURATION, "p(99)<500")?)
        .with_threshold(Threshold::parse(names::REQUEST_FAILED, "rate<0.01")?)
        .with_threshold(Threshold::parse("errors", "rate<0.05")?))?;

    if !report.passed() {
        std::process::exit(1);
    }
    Ok(())
}
