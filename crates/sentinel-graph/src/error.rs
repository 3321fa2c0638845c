//! Error types for graph construction, execution and shutdown.

use std::fmt;

use thiserror::Error;

use sentinel_context::ContextError;

use crate::initializer::BoxError;

/// Errors returned by [`crate::InitializerGraph`].
#[derive(Debug, Error)]
pub enum GraphError {
    /// Two initializers share a name.
    #[error("duplicate initializer name: {name}")]
    Duplicate {
        /// The colliding name.
        name: String,
    },

    /// An initializer depends on a name nobody declared.
    #[error("initializer {initializer} depends on undeclared initializer {dependency}")]
    MissingDependency {
        /// Initializer declaring the dependency.
        initializer: String,
        /// The dangling name.
        dependency: String,
    },

    /// The dependencies form a cycle.
    #[error("dependency cycle detected: {}", path.join(" → "))]
    Cycle {
        /// Nodes along the cycle; the first name is repeated at the end.
        path: Vec<String>,
    },

    /// An initializer returned an error.
    #[error("initializer {name} failed: {source}")]
    InitializerFailed {
        /// Name of the failing initializer.
        name: String,
        /// Error it returned.
        #[source]
        source: BoxError,
    },

    /// The context ended before an initializer could start.
    #[error("bootstrap interrupted before {name}: {source}")]
    Interrupted {
        /// Initializer that did not start.
        name: String,
        /// Why the context ended.
        #[source]
        source: ContextError,
    },

    /// One or more shutdowners failed. Every shutdowner was still attempted.
    #[error("{} shutdown step(s) failed: {}", failures.len(), ShutdownFailures(failures))]
    Shutdown {
        /// One entry per failing shutdowner, in the order they ran.
        failures: Vec<ShutdownFailure>,
    },
}

impl GraphError {
    /// Creates a [`GraphError::Duplicate`].
    #[must_use]
    pub fn duplicate(name: impl Into<String>) -> Self {
        Self::Duplicate { name: name.into() }
    }

    /// Creates a [`GraphError::MissingDependency`].
    #[must_use]
    pub fn missing_dependency(initializer: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::MissingDependency {
            initializer: initializer.into(),
            dependency: dependency.into(),
        }
    }

    /// Whether the error comes from a malformed graph rather than a step.
    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::Duplicate { .. } | Self::MissingDependency { .. } | Self::Cycle { .. }
        )
    }
}

/// A shutdowner that returned an error.
#[derive(Debug)]
pub struct ShutdownFailure {
    /// Initializer whose shutdown failed.
    pub name: String,
    /// The returned error.
    pub source: BoxError,
}

impl fmt::Display for ShutdownFailure {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}: {}", self.name, self.source)
    }
}

struct ShutdownFailures<'a>(&'a [ShutdownFailure]);

impl fmt::Display for ShutdownFailures<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, failure) in self.0.iter().enumerate() {
            if index > 0 {
                formatter.write_str("; ")?;
            }
            write!(formatter, "{failure}")?;
        }
        Ok(())
    }
}
