//! Ordered execution and reverse teardown of initializers.

use std::fmt;

use tracing::{error, info, warn};

use sentinel_context::Context;

use crate::error::{GraphError, ShutdownFailure};
use crate::initializer::Initializer;
use crate::order::{Declaration, resolve};

const GRAPH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::graph");

struct Step {
    initializer: Box<dyn Initializer>,
    shutdown_capable: bool,
}

/// A validated set of initializers held in execution order.
pub struct InitializerGraph {
    steps: Vec<Step>,
    executed: usize,
}

impl InitializerGraph {
    /// Validates `initializers` and orders them so that every dependency runs
    /// before its dependents. Ties keep declaration order.
    ///
    /// Shutdown-capable initializers are noted here so teardown does not need
    /// to try them again.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Duplicate`], [`GraphError::MissingDependency`] or
    /// [`GraphError::Cycle`].
    pub fn build(initializers: Vec<Box<dyn Initializer>>) -> Result<Self, GraphError> {
        let declarations: Vec<Declaration> = initializers
            .iter()
            .map(|initializer| Declaration::new(initializer.name(), initializer.dependencies()))
            .collect();
        let order = resolve(&declarations)?;

        let mut slots: Vec<Option<Box<dyn Initializer>>> =
            initializers.into_iter().map(Some).collect();
        let steps = order
            .into_iter()
            .filter_map(|index| slots.get_mut(index).and_then(Option::take))
            .map(|mut initializer| {
                let shutdown_capable = initializer.as_shutdowner().is_some();
                Step {
                    initializer,
                    shutdown_capable,
                }
            })
            .collect();
        Ok(Self { steps, executed: 0 })
    }

    /// Names in execution order.
    #[must_use]
    pub fn order(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.initializer.name()).collect()
    }

    /// Number of initializers.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the graph has no initializers.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of initializers that completed successfully.
    #[must_use]
    pub const fn executed(&self) -> usize {
        self.executed
    }

    /// Runs every initializer that has not run yet, in order.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Interrupted`] when `ctx` ends between steps and
    /// [`GraphError::InitializerFailed`] for the first failing step. Later
    /// steps do not run.
    pub fn run(&mut self, ctx: &Context) -> Result<(), GraphError> {
        for step in self.steps.iter_mut().skip(self.executed) {
            let name = step.initializer.name().to_owned();
            ctx.check()
                .map_err(|source| GraphError::Interrupted {
                    name: name.clone(),
                    source,
                })?;

            info!(target: GRAPH_TARGET, event = "initializing", initializer = %name, "Initializing {name}...");
            if let Err(source) = step.initializer.initialize(ctx) {
                error!(
                    target: GRAPH_TARGET,
                    event = "initializer_failed",
                    initializer = %name,
                    error = %source,
                    "{name} failed to initialize"
                );
                return Err(GraphError::InitializerFailed { name, source });
            }
            info!(
                target: GRAPH_TARGET,
                event = "initialized",
                initializer = %name,
                "{name} initialized successfully"
            );
            self.executed += 1;
        }
        Ok(())
    }

    /// Shuts down the executed, shutdown-capable initializers in reverse
    /// execution order.
    ///
    /// Every shutdowner runs even when an earlier one fails. A second call
    /// does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Shutdown`] listing every failure.
    pub fn shutdown(&mut self, ctx: &Context) -> Result<(), GraphError> {
        let executed = std::mem::take(&mut self.executed);
        let mut failures = Vec::new();
        for step in self.steps.iter_mut().take(executed).rev() {
            if !step.shutdown_capable {
                continue;
            }
            let name = step.initializer.name().to_owned();
            let Some(shutdowner) = step.initializer.as_shutdowner() else {
                continue;
            };
            info!(target: GRAPH_TARGET, event = "shutting_down", initializer = %name, "Shutting down {name}...");
            if let Err(source) = shutdowner.shutdown(ctx) {
                warn!(
                    target: GRAPH_TARGET,
                    event = "shutdown_failed",
                    initializer = %name,
                    error = %source,
                    "{name} failed to shut down"
                );
                failures.push(ShutdownFailure { name, source });
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(GraphError::Shutdown { failures })
        }
    }
}

impl fmt::Debug for InitializerGraph {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("InitializerGraph")
            .field("order", &self.order())
            .field("executed", &self.executed)
            .finish()
    }
}
