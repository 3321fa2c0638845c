//! Behavioural tests for graph construction, ordering and shutdown.

use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use sentinel_context::Context;

use crate::{BoxError, GraphError, Initializer, InitializerGraph, Shutdowner};

type StepResult = Result<(), String>;
type Journal = Arc<Mutex<Vec<String>>>;

struct Recording {
    name: String,
    dependencies: Vec<String>,
    fail_shutdown: bool,
    journal: Journal,
}

impl Initializer for Recording {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> Vec<String> {
        self.dependencies.clone()
    }

    fn initialize(&mut self, _ctx: &Context) -> Result<(), BoxError> {
        self.journal
            .lock()
            .map_err(|_| "journal poisoned")?
            .push(format!("init {}", self.name));
        Ok(())
    }

    fn as_shutdowner(&mut self) -> Option<&mut dyn Shutdowner> {
        Some(self)
    }
}

impl Shutdowner for Recording {
    fn shutdown(&mut self, _ctx: &Context) -> Result<(), BoxError> {
        self.journal
            .lock()
            .map_err(|_| "journal poisoned")?
            .push(format!("shutdown {}", self.name));
        if self.fail_shutdown {
            return Err(format!("{} refused to stop", self.name).into());
        }
        Ok(())
    }
}

#[derive(Default)]
struct TestWorld {
    declared: Vec<(String, Vec<String>)>,
    failing_shutdowns: HashSet<String>,
    journal: Journal,
    graph: Option<InitializerGraph>,
    build_error: Option<GraphError>,
    shutdown_result: Option<Result<(), GraphError>>,
}

impl TestWorld {
    fn entries(&self, prefix: &str) -> Vec<String> {
        self.journal
            .lock()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| entry.strip_prefix(prefix))
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[fixture]
fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::default())
}

fn split_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}

#[given("initializer {name} depends on {dependencies}")]
fn given_dependent(world: &RefCell<TestWorld>, name: String, dependencies: String) {
    world
        .borrow_mut()
        .declared
        .push((name, split_names(&dependencies)));
}

#[given("initializer {name} has no dependencies")]
fn given_leaf(world: &RefCell<TestWorld>, name: String) {
    world.borrow_mut().declared.push((name, Vec::new()));
}

#[given("shutdown of {name} fails")]
fn given_failing_shutdown(world: &RefCell<TestWorld>, name: String) {
    world.borrow_mut().failing_shutdowns.insert(name);
}

#[when("the graph is built and run")]
fn when_built_and_run(world: &RefCell<TestWorld>) -> StepResult {
    let mut state = world.borrow_mut();
    let initializers: Vec<Box<dyn Initializer>> = state
        .declared
        .iter()
        .map(|(name, dependencies)| {
            Box::new(Recording {
                name: name.clone(),
                dependencies: dependencies.clone(),
                fail_shutdown: state.failing_shutdowns.contains(name),
                journal: Arc::clone(&state.journal),
            }) as Box<dyn Initializer>
        })
        .collect();
    match InitializerGraph::build(initializers) {
        Ok(mut graph) => {
            graph
                .run(&Context::background())
                .map_err(|error| error.to_string())?;
            state.graph = Some(graph);
        }
        Err(error) => state.build_error = Some(error),
    }
    Ok(())
}

#[when("the graph is shut down")]
fn when_shut_down(world: &RefCell<TestWorld>) -> StepResult {
    let mut state = world.borrow_mut();
    let graph = state.graph.as_mut().ok_or("graph was not built")?;
    let result = graph.shutdown(&Context::background());
    state.shutdown_result = Some(result);
    Ok(())
}

#[then("the execution order is {names}")]
fn then_execution_order(world: &RefCell<TestWorld>, names: String) -> StepResult {
    let executed = world.borrow().entries("init ");
    let expected = split_names(&names);
    if executed == expected {
        Ok(())
    } else {
        Err(format!("expected {expected:?}, ran {executed:?}"))
    }
}

#[then("{name} runs first")]
fn then_runs_first(world: &RefCell<TestWorld>, name: String) -> StepResult {
    let executed = world.borrow().entries("init ");
    match executed.first() {
        Some(first) if *first == name => Ok(()),
        _ => Err(format!("{name} is not first in {executed:?}")),
    }
}

#[then("{name} runs last")]
fn then_runs_last(world: &RefCell<TestWorld>, name: String) -> StepResult {
    let executed = world.borrow().entries("init ");
    match executed.last() {
        Some(last) if *last == name => Ok(()),
        _ => Err(format!("{name} is not last in {executed:?}")),
    }
}

#[then("building fails with \"{message}\"")]
fn then_build_fails(world: &RefCell<TestWorld>, message: String) -> StepResult {
    let state = world.borrow();
    match &state.build_error {
        Some(error) if error.to_string() == message => {
            if state.entries("init ").is_empty() {
                Ok(())
            } else {
                Err(String::from("initializers ran despite the build failure"))
            }
        }
        Some(error) => Err(format!("unexpected error: {error}")),
        None => Err(String::from("graph built unexpectedly")),
    }
}

#[then("the shutdown order is {names}")]
fn then_shutdown_order(world: &RefCell<TestWorld>, names: String) -> StepResult {
    let stopped = world.borrow().entries("shutdown ");
    let expected = split_names(&names);
    if stopped == expected {
        Ok(())
    } else {
        Err(format!("expected {expected:?}, stopped {stopped:?}"))
    }
}

#[then("shutdown reports {count} failures")]
fn then_shutdown_failures(world: &RefCell<TestWorld>, count: usize) -> StepResult {
    match &world.borrow().shutdown_result {
        Some(Err(GraphError::Shutdown { failures })) if failures.len() == count => Ok(()),
        other => Err(format!("unexpected shutdown result: {other:?}")),
    }
}

#[scenario(path = "tests/features/initializer_graph.feature", name = "Linear chain runs leaves first")]
fn linear_chain(world: RefCell<TestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/initializer_graph.feature",
    name = "Diamond runs the shared dependency first"
)]
fn diamond(world: RefCell<TestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/initializer_graph.feature",
    name = "A cycle is rejected with its path"
)]
fn cycle(world: RefCell<TestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/initializer_graph.feature",
    name = "A self dependency is a one node cycle"
)]
fn self_cycle(world: RefCell<TestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/initializer_graph.feature",
    name = "A missing dependency is named"
)]
fn missing_dependency(world: RefCell<TestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/initializer_graph.feature",
    name = "The core pipeline resolves in bootstrap order"
)]
fn core_pipeline(world: RefCell<TestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/initializer_graph.feature",
    name = "Shutdown runs in reverse and reports every failure"
)]
fn reverse_shutdown(world: RefCell<TestWorld>) {
    drop(world);
}
