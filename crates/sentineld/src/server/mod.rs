//! The request server.
//!
//! The server initializer hands a [`ServerFactory`] the configured options,
//! the populated [`Router`] and the bound [`MiddlewareOptions`]. The
//! resulting [`ServerRuntime`] is run by the application once bootstrap has
//! finished, and stops when its [`ShutdownSignal`] fires.
//!
//! The bundled [`SocketServerFactory`] serves newline-delimited JSON over
//! TCP: each line is a [`Request`], each reply a [`Response`].

mod listener;
mod pipeline;
mod router;
mod shutdown;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use sentinel_config::ServerOptions;
use sentinel_context::Context;

use crate::middleware::MiddlewareOptions;

pub use self::listener::ListenerError;
pub use self::pipeline::RequestPipeline;
pub use self::router::{Request, Response, RouteHandler, Router};
pub use self::shutdown::{
    ChannelShutdownSignal, ShutdownError, ShutdownSignal, ShutdownTrigger, SystemShutdownSignal,
};

use self::listener::SocketListener;
use self::pipeline::ConnectionHandler;

pub(crate) const SERVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::server");

/// Errors raised while building or running a server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or running the listener failed.
    #[error(transparent)]
    Listener(#[from] ListenerError),
    /// Waiting for the shutdown signal failed.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
    /// `run` was called on a server that already ran.
    #[error("server has already run")]
    AlreadyRun,
}

/// Everything a factory needs to build a server.
#[derive(Debug, Clone)]
pub struct ServerParts {
    /// Listener configuration.
    pub options: ServerOptions,
    /// Routes, built-ins included.
    pub router: Router,
    /// Middleware bound during bootstrap.
    pub middleware: Arc<MiddlewareOptions>,
}

impl ServerParts {
    /// Combines routing and middleware into one pipeline.
    #[must_use]
    pub fn into_pipeline(self) -> RequestPipeline {
        RequestPipeline::new(self.router, self.middleware)
    }
}

/// A built server, waiting to run.
pub trait ServerRuntime: Send + Sync {
    /// Address the server listens on.
    fn address(&self) -> String;

    /// Serves until `signal` fires.
    ///
    /// # Errors
    ///
    /// Returns a [`ServerError`] when serving or waiting fails.
    fn run(&mut self, signal: &dyn ShutdownSignal) -> Result<(), ServerError>;
}

/// Builds servers from [`ServerParts`].
pub trait ServerFactory: Send + Sync {
    /// Builds, and usually binds, a server.
    ///
    /// # Errors
    ///
    /// Returns a [`ServerError`] when the server cannot be built.
    fn build(&self, parts: ServerParts) -> Result<Box<dyn ServerRuntime>, ServerError>;
}

/// Builds [`SocketServer`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketServerFactory;

impl ServerFactory for SocketServerFactory {
    fn build(&self, parts: ServerParts) -> Result<Box<dyn ServerRuntime>, ServerError> {
        Ok(Box::new(SocketServer::bind(parts)?))
    }
}

/// JSONL-over-TCP server.
#[derive(Debug)]
pub struct SocketServer {
    listener: Option<SocketListener>,
    address: SocketAddr,
    handler: Arc<ConnectionHandler>,
    root: Context,
    shutdown_timeout: Duration,
}

impl SocketServer {
    /// Binds the configured address.
    ///
    /// # Errors
    ///
    /// Returns a [`ServerError`] when the address cannot be resolved or bound.
    pub fn bind(parts: ServerParts) -> Result<Self, ServerError> {
        let listener = SocketListener::bind(&parts.options.host, parts.options.port)?;
        let address = listener.local_addr();
        let root = Context::background();
        let handler = ConnectionHandler::new(
            RequestPipeline::new(parts.router, parts.middleware),
            root.clone(),
            parts.options.read_timeout,
            usize::try_from(parts.options.max_request_bytes).unwrap_or(usize::MAX),
        );
        Ok(Self {
            listener: Some(listener),
            address,
            handler: Arc::new(handler),
            root,
            shutdown_timeout: parts.options.shutdown_timeout,
        })
    }

    /// The bound socket address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.address
    }
}

impl ServerRuntime for SocketServer {
    fn address(&self) -> String {
        self.address.to_string()
    }

    fn run(&mut self, signal: &dyn ShutdownSignal) -> Result<(), ServerError> {
        let listener = self.listener.take().ok_or(ServerError::AlreadyRun)?;
        let handle = listener.start(Arc::clone(&self.handler), self.shutdown_timeout)?;
        info!(
            target: SERVER_TARGET,
            event = "serving",
            address = %self.address,
            "server accepting connections"
        );
        let waited = signal.wait();
        self.root.cancel();
        handle.shutdown();
        let joined = handle.join();
        info!(
            target: SERVER_TARGET,
            event = "stopped",
            address = %self.address,
            "server stopped"
        );
        waited?;
        joined?;
        Ok(())
    }
}
