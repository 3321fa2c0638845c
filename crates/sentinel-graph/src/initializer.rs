//! The contract every bootstrap step implements.

use std::error::Error;

use sentinel_context::Context;

/// Error type returned by initializers and shutdowners.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// One named phase of bootstrap.
pub trait Initializer: Send {
    /// Unique name, referenced by other initializers' dependencies.
    fn name(&self) -> &str;

    /// Names of the initializers that must run first.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Performs the phase.
    ///
    /// # Errors
    ///
    /// Any error halts the pipeline; no later initializer runs.
    fn initialize(&mut self, ctx: &Context) -> Result<(), BoxError>;

    /// Returns the shutdown capability, when the initializer has one.
    fn as_shutdowner(&mut self) -> Option<&mut dyn Shutdowner> {
        None
    }
}

/// Teardown for an initializer that acquired resources.
pub trait Shutdowner {
    /// Releases what [`Initializer::initialize`] acquired.
    ///
    /// # Errors
    ///
    /// Errors are collected; they never stop other shutdowners from running.
    fn shutdown(&mut self, ctx: &Context) -> Result<(), BoxError>;
}
