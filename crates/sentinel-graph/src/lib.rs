//! Dependency-ordered bootstrap steps.
//!
//! An [`Initializer`] names itself and the initializers it depends on.
//! [`InitializerGraph::build`] rejects duplicate names, dangling dependencies
//! and cycles (reported as `a → b → c → a`), then fixes a deterministic
//! topological order. [`InitializerGraph::run`] executes that order and
//! [`InitializerGraph::shutdown`] tears the executed steps down in reverse.

mod error;
mod graph;
mod initializer;
mod order;

pub use error::{GraphError, ShutdownFailure};
pub use graph::InitializerGraph;
pub use initializer::{BoxError, Initializer, Shutdowner};

#[cfg(test)]
mod tests;
