//! Behavioural tests for bootstrapping, serving and tearing down a service.

use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, MutexGuard};

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::json;

use sentinel_config::MapEnv;
use sentinel_datasource::test_support::{StubDriver, global_lock};
use sentinel_datasource::{Kind, Registry, global};

use super::support::{AfterServer, ScriptedFactory, ScriptedRequest};
use crate::auth::TokenAuthenticator;
use crate::server::{ChannelShutdownSignal, Response, Router};
use crate::{AppError, AppInfo, AppOptions, Application};

const SIGNING_KEY: &str = "an-hmac-key-of-at-least-32-bytes!";

type StepResult = Result<(), String>;

struct TestWorld {
    _guard: MutexGuard<'static, ()>,
    options: AppOptions,
    env: MapEnv,
    driver: StubDriver,
    requests: Vec<ScriptedRequest>,
    factory: Option<ScriptedFactory>,
    extra_ran: Arc<AtomicUsize>,
    outcome: Option<Result<(), AppError>>,
}

impl TestWorld {
    fn new() -> Self {
        Self {
            _guard: global_lock(),
            options: AppOptions::default(),
            env: MapEnv::new().with("JWT_KEY", SIGNING_KEY),
            driver: StubDriver::new(),
            requests: Vec::new(),
            factory: None,
            extra_ran: Arc::new(AtomicUsize::new(0)),
            outcome: None,
        }
    }

    fn error(&self) -> Result<&AppError, String> {
        match &self.outcome {
            Some(Err(error)) => Ok(error),
            Some(Ok(())) => Err(String::from("the run succeeded")),
            None => Err(String::from("the application has not run")),
        }
    }
}

impl Drop for TestWorld {
    fn drop(&mut self) {
        drop(global::reset());
    }
}

#[fixture]
fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::new())
}

fn register_routes(
    router: &mut Router,
    _authenticator: Option<&Arc<TokenAuthenticator>>,
    _registry: &Arc<Registry>,
) {
    router
        .get("/api/v1/orders", |_, _| Response::ok(json!({ "orders": [] })))
        .get("/api/v1/user", |_, _| Response::ok(json!({ "name": "tester" })))
        .route("DELETE", "/api/v1/user", |_, _| Response::ok(json!({ "deleted": true })));
}

#[given("a service with redis configured")]
fn given_redis_service(world: &RefCell<TestWorld>) {
    world.borrow_mut().options.redis.host = String::from("cache.internal");
}

#[given("authentication is disabled")]
fn given_auth_disabled(world: &RefCell<TestWorld>) {
    world.borrow_mut().options.jwt.disable_auth = true;
}

#[given("the signing key is missing")]
fn given_missing_key(world: &RefCell<TestWorld>) {
    world.borrow_mut().env = MapEnv::new();
}

#[given("redis refuses connections")]
fn given_redis_refuses(world: &RefCell<TestWorld>) {
    world
        .borrow()
        .driver
        .fail_connect("redis:default", "connection refused");
}

#[given("redis stops answering pings")]
fn given_redis_silent(world: &RefCell<TestWorld>) {
    world.borrow().driver.fail_ping("redis:default", "i/o timeout");
}

#[given("an anonymous request to {method} {path}")]
fn given_anonymous_request(world: &RefCell<TestWorld>, method: String, path: String) {
    world.borrow_mut().requests.push(ScriptedRequest {
        method,
        path,
        role: None,
    });
}

#[given("a request to {method} {path} as role {role}")]
fn given_role_request(world: &RefCell<TestWorld>, method: String, path: String, role: String) {
    world.borrow_mut().requests.push(ScriptedRequest {
        method,
        path,
        role: Some(role),
    });
}

#[when("the application runs")]
fn when_application_runs(world: &RefCell<TestWorld>) {
    let mut state = world.borrow_mut();
    let factory = ScriptedFactory::new(state.requests.clone());
    let (trigger, signal) = ChannelShutdownSignal::new();
    trigger.trigger();
    let application = Application::new(
        AppInfo::new("orders", "0.1.0", "order service"),
        state.options.clone(),
    )
    .with_env(state.env.clone())
    .with_driver(Kind::Redis, state.driver.clone())
    .with_server_factory(factory.clone())
    .with_shutdown_signal(signal)
    .with_registration(register_routes)
    .with_initializer(AfterServer {
        ran: Arc::clone(&state.extra_ran),
    });
    state.outcome = Some(application.run());
    state.factory = Some(factory);
}

#[then("the run succeeds")]
fn then_run_succeeds(world: &RefCell<TestWorld>) -> StepResult {
    match &world.borrow().outcome {
        Some(Ok(())) => Ok(()),
        Some(Err(error)) => Err(format!("run failed: {error}")),
        None => Err(String::from("the application has not run")),
    }
}

#[then("the run fails during bootstrap")]
fn then_bootstrap_fails(world: &RefCell<TestWorld>) -> StepResult {
    match world.borrow().error()? {
        AppError::Bootstrap { .. } => Ok(()),
        other => Err(format!("unexpected error: {other}")),
    }
}

#[then("the run fails during option validation")]
fn then_options_fail(world: &RefCell<TestWorld>) -> StepResult {
    match world.borrow().error()? {
        AppError::Options { .. } => Ok(()),
        other => Err(format!("unexpected error: {other}")),
    }
}

#[then("the error mentions {text}")]
fn then_error_mentions(world: &RefCell<TestWorld>, text: String) -> StepResult {
    let rendered = world.borrow().error()?.to_string();
    if rendered.contains(&text) {
        Ok(())
    } else {
        Err(format!("`{rendered}` does not mention {text}"))
    }
}

#[then("the request to {path} answered {status}")]
fn then_request_answered(world: &RefCell<TestWorld>, path: String, status: u16) -> StepResult {
    let state = world.borrow();
    let factory = state.factory.as_ref().ok_or("the application has not run")?;
    let response = factory
        .answer(&path)
        .ok_or_else(|| format!("no answer recorded for {path}"))?;
    if response.status == status {
        Ok(())
    } else {
        Err(format!("{path} answered {response:?}"))
    }
}

#[then("the extra initializer ran")]
fn then_extra_ran(world: &RefCell<TestWorld>) -> StepResult {
    match world.borrow().extra_ran.load(Ordering::SeqCst) {
        1 => Ok(()),
        runs => Err(format!("extra initializer ran {runs} times")),
    }
}

#[then("the extra initializer did not run")]
fn then_extra_skipped(world: &RefCell<TestWorld>) -> StepResult {
    match world.borrow().extra_ran.load(Ordering::SeqCst) {
        0 => Ok(()),
        runs => Err(format!("extra initializer ran {runs} times")),
    }
}

#[then("no server was built")]
fn then_no_server(world: &RefCell<TestWorld>) -> StepResult {
    let builds = world
        .borrow()
        .factory
        .as_ref()
        .map_or(0, ScriptedFactory::builds);
    if builds == 0 {
        Ok(())
    } else {
        Err(format!("server was built {builds} times"))
    }
}

#[then("the redis connection was closed")]
fn then_redis_closed(world: &RefCell<TestWorld>) -> StepResult {
    let closed = world.borrow().driver.closed();
    if closed == ["redis:default"] {
        Ok(())
    } else {
        Err(format!("closed connections: {closed:?}"))
    }
}

#[scenario(
    path = "tests/features/application_bootstrap.feature",
    name = "A configured service boots, serves and shuts down"
)]
fn boots_serves_and_stops(world: RefCell<TestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/application_bootstrap.feature",
    name = "Roles decide what an authenticated caller may do"
)]
fn roles_gate_requests(world: RefCell<TestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/application_bootstrap.feature",
    name = "Disabled authentication leaves routes open"
)]
fn disabled_auth(world: RefCell<TestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/application_bootstrap.feature",
    name = "Readiness reports an unhealthy datasource"
)]
fn unhealthy_readiness(world: RefCell<TestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/application_bootstrap.feature",
    name = "A failing datasource halts bootstrap"
)]
fn failing_datasource(world: RefCell<TestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/application_bootstrap.feature",
    name = "Invalid configuration stops before bootstrap"
)]
fn invalid_configuration(world: RefCell<TestWorld>) {
    drop(world);
}
