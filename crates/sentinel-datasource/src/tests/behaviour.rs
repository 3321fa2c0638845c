//! Behavioural tests for registry lifecycle, health and shutdown.

use std::cell::RefCell;
use std::collections::BTreeMap;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use sentinel_config::{
    EtcdOptions, MapEnv, MongoDbOptions, MySqlOptions, PostgresOptions, RedisOptions,
};
use sentinel_context::Context;

use crate::test_support::StubDriver;
use crate::{HealthStatus, Kind, Registry, RegistryError};

type StepResult = Result<(), String>;

struct TestWorld {
    driver: StubDriver,
    registry: Registry,
    init_result: Option<Result<(), RegistryError>>,
    lookups: Vec<Result<(), RegistryError>>,
    health: BTreeMap<String, HealthStatus>,
    close_result: Option<Result<(), RegistryError>>,
}

impl TestWorld {
    fn new() -> Self {
        let driver = StubDriver::new();
        let registry = Registry::new()
            .with_default_driver(driver.clone())
            .with_env(MapEnv::new());
        Self {
            driver,
            registry,
            init_result: None,
            lookups: Vec::new(),
            health: BTreeMap::new(),
            close_result: None,
        }
    }

    fn register(&self, kind: Kind, name: &str) -> Result<(), RegistryError> {
        match kind {
            Kind::MySql => self.registry.register_mysql(
                name,
                &MySqlOptions {
                    host: "db".into(),
                    database: "app".into(),
                    ..MySqlOptions::default()
                },
            ),
            Kind::Postgres => self.registry.register_postgres(
                name,
                &PostgresOptions {
                    host: "pg".into(),
                    database: "app".into(),
                    ..PostgresOptions::default()
                },
            ),
            Kind::Redis => self.registry.register_redis(
                name,
                &RedisOptions {
                    host: "cache".into(),
                    ..RedisOptions::default()
                },
            ),
            Kind::MongoDb => self.registry.register_mongodb(
                name,
                &MongoDbOptions {
                    host: "docs".into(),
                    ..MongoDbOptions::default()
                },
            ),
            Kind::Etcd => self.registry.register_etcd(
                name,
                &EtcdOptions {
                    endpoints: vec![String::from("coord:2379")],
                    ..EtcdOptions::default()
                },
            ),
        }
    }
}

#[fixture]
fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::new())
}

fn parse_kind(raw: &str) -> Result<Kind, String> {
    raw.parse::<Kind>().map_err(|error| error.to_string())
}

#[given("a registry with a {kind} datasource named {name}")]
fn given_registered(world: &RefCell<TestWorld>, kind: String, name: String) -> StepResult {
    let parsed = parse_kind(&kind)?;
    world
        .borrow()
        .register(parsed, &name)
        .map_err(|error| error.to_string())
}

#[given("the driver refuses {key}")]
fn given_refused(world: &RefCell<TestWorld>, key: String) {
    world.borrow().driver.fail_connect(&key, "connection refused");
}

#[given("pings to {key} fail")]
fn given_ping_failure(world: &RefCell<TestWorld>, key: String) {
    world.borrow().driver.fail_ping(&key, "i/o timeout");
}

#[given("every datasource is initialized")]
fn given_initialized(world: &RefCell<TestWorld>) -> StepResult {
    world
        .borrow()
        .registry
        .init_all(&Context::background())
        .map_err(|error| error.to_string())
}

#[when("every datasource is initialized")]
fn when_initialized(world: &RefCell<TestWorld>) {
    let result = world.borrow().registry.init_all(&Context::background());
    world.borrow_mut().init_result = Some(result);
}

#[when("the {kind} datasource {name} is requested {count} times")]
fn when_requested(
    world: &RefCell<TestWorld>,
    kind: String,
    name: String,
    count: usize,
) -> StepResult {
    let parsed = parse_kind(&kind)?;
    for _ in 0..count {
        let result = world
            .borrow()
            .registry
            .client(parsed, &name)
            .map(|_| ());
        world.borrow_mut().lookups.push(result);
    }
    Ok(())
}

#[when("the registry health is checked")]
fn when_health_checked(world: &RefCell<TestWorld>) {
    let statuses = world
        .borrow()
        .registry
        .health_check_all(&Context::background());
    world.borrow_mut().health = statuses;
}

#[when("the registry is closed")]
fn when_closed(world: &RefCell<TestWorld>) {
    let result = world.borrow().registry.close_all();
    world.borrow_mut().close_result = Some(result);
}

#[then("the driver connected {key} {count} time")]
fn then_connect_count(world: &RefCell<TestWorld>, key: String, count: usize) -> StepResult {
    let borrowed = world.borrow();
    if let Some(Err(error)) = borrowed.lookups.iter().find(|lookup| lookup.is_err()) {
        return Err(format!("lookup failed: {error}"));
    }
    let actual = borrowed.driver.connects(&key);
    if actual == count {
        Ok(())
    } else {
        Err(format!("expected {count} connects for {key}, saw {actual}"))
    }
}

#[then("{key} is initialized")]
fn then_initialized(world: &RefCell<TestWorld>, key: String) -> StepResult {
    let initialized = world.borrow().registry.list_initialized();
    if initialized.contains(&key) {
        Ok(())
    } else {
        Err(format!("{key} missing from {initialized:?}"))
    }
}

#[then("initialization fails naming {key}")]
fn then_init_fails(world: &RefCell<TestWorld>, key: String) -> StepResult {
    let borrowed = world.borrow();
    match &borrowed.init_result {
        Some(Err(error)) => {
            let named = error
                .datasource()
                .map(|(kind, name)| crate::make_key(kind, name));
            if named.as_deref() == Some(key.as_str()) {
                Ok(())
            } else {
                Err(format!("error names {named:?}: {error}"))
            }
        }
        other => Err(format!("expected a failed init, got {other:?}")),
    }
}

#[then("the initialized set is empty")]
fn then_none_initialized(world: &RefCell<TestWorld>) {
    let initialized = world.borrow().registry.list_initialized();
    assert!(initialized.is_empty(), "still initialized: {initialized:?}");
}

#[then("the driver closed {count} clients")]
fn then_closed_count(world: &RefCell<TestWorld>, count: usize) {
    let closed = world.borrow().driver.closed();
    assert_eq!(closed.len(), count, "closed: {closed:?}");
}

#[then("{key} is healthy")]
fn then_healthy(world: &RefCell<TestWorld>, key: String) -> StepResult {
    match world.borrow().health.get(&key) {
        Some(status) if status.healthy => Ok(()),
        other => Err(format!("{key} not healthy: {other:?}")),
    }
}

#[then("{key} is unhealthy")]
fn then_unhealthy(world: &RefCell<TestWorld>, key: String) -> StepResult {
    match world.borrow().health.get(&key) {
        Some(status) if !status.healthy && status.error.is_some() => Ok(()),
        other => Err(format!("{key} not reported unhealthy: {other:?}")),
    }
}

#[then("the registry reports unhealthy")]
fn then_registry_unhealthy(world: &RefCell<TestWorld>) {
    assert!(!world.borrow().registry.is_healthy(&Context::background()));
}

#[then("looking up {kind} {name} fails because the registry is closed")]
fn then_lookup_closed(world: &RefCell<TestWorld>, kind: String, name: String) -> StepResult {
    let parsed = parse_kind(&kind)?;
    let borrowed = world.borrow();
    if !matches!(borrowed.close_result, Some(Ok(()))) {
        return Err(String::from("close_all did not succeed"));
    }
    match borrowed.registry.client(parsed, &name) {
        Err(RegistryError::Closed) => Ok(()),
        Err(error) => Err(format!("unexpected error: {error}")),
        Ok(_) => Err(String::from("lookup succeeded after close")),
    }
}

#[scenario(
    path = "tests/features/datasource_registry.feature",
    name = "Lazy lookup connects a datasource once"
)]
fn lazy_lookup(world: RefCell<TestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/datasource_registry.feature",
    name = "A failing connect rolls back the whole batch"
)]
fn batch_rollback(world: RefCell<TestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/datasource_registry.feature",
    name = "Health checks isolate an unhealthy datasource"
)]
fn health_isolation(world: RefCell<TestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/datasource_registry.feature",
    name = "Closing the registry is terminal"
)]
fn terminal_close(world: RefCell<TestWorld>) {
    drop(world);
}
