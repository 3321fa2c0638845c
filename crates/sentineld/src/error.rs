//! Errors surfaced by [`crate::Application::run`].

use thiserror::Error;

use sentinel_config::OptionError;
use sentinel_graph::GraphError;

use crate::server::ServerError;

/// Staged application failures.
#[derive(Debug, Error)]
pub enum AppError {
    /// Options failed completion or validation.
    #[error("invalid configuration: {source}")]
    Options {
        /// Every collected option failure.
        #[source]
        source: OptionError,
    },
    /// The initializer graph could not be built or a step failed.
    #[error("bootstrap failed: {source}")]
    Bootstrap {
        /// Graph or initializer failure.
        #[source]
        source: GraphError,
    },
    /// Bootstrap finished without publishing a server.
    #[error("bootstrap finished without building a server")]
    ServerMissing,
    /// The server stopped with an error.
    #[error("server failed: {source}")]
    Server {
        /// Serving failure.
        #[source]
        source: ServerError,
    },
    /// One or more shutdown steps failed.
    #[error("shutdown incomplete: {source}")]
    Shutdown {
        /// Collected shutdown failures.
        #[source]
        source: GraphError,
    },
}
