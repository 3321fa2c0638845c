//! Shutdown signals the server blocks on.

use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::info;

use sentinel_context::Context;

use super::SERVER_TARGET;

const SIGNAL_POLL: Duration = Duration::from_millis(50);

/// Abstraction over shutdown notification mechanisms.
pub trait ShutdownSignal: Send + Sync {
    /// Blocks until shutdown should proceed.
    ///
    /// # Errors
    ///
    /// Returns a [`ShutdownError`] when the mechanism cannot be armed.
    fn wait(&self) -> Result<(), ShutdownError>;
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Waits for SIGTERM, SIGINT, SIGQUIT or SIGHUP, or for its context to end.
///
/// Cancelling the context, or letting its deadline pass, stops the server
/// the same way a signal does.
#[derive(Debug, Clone)]
pub struct SystemShutdownSignal {
    ctx: Context,
}

impl SystemShutdownSignal {
    /// Builds a listener that also returns once `ctx` is done.
    #[must_use]
    pub const fn new(ctx: Context) -> Self {
        Self { ctx }
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> Result<(), ShutdownError> {
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
            .map_err(|source| ShutdownError::Install { source })?;
        loop {
            if let Some(signal) = signals.pending().next() {
                info!(
                    target: SERVER_TARGET,
                    event = "shutdown_signal",
                    signal,
                    "shutdown signal received"
                );
                return Ok(());
            }
            if let Err(reason) = self.ctx.sleep(SIGNAL_POLL) {
                info!(
                    target: SERVER_TARGET,
                    event = "shutdown_signal",
                    reason = %reason,
                    "shutdown requested by context"
                );
                return Ok(());
            }
        }
    }
}

/// Shutdown driven by a [`ShutdownTrigger`]. Dropping every trigger also
/// releases the waiter.
#[derive(Debug)]
pub struct ChannelShutdownSignal {
    receiver: Mutex<Receiver<()>>,
}

/// Releases a [`ChannelShutdownSignal`].
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    sender: Sender<()>,
}

impl ChannelShutdownSignal {
    /// Creates a signal and the trigger that fires it.
    #[must_use]
    pub fn new() -> (ShutdownTrigger, Self) {
        let (sender, receiver) = mpsc::channel();
        (
            ShutdownTrigger { sender },
            Self {
                receiver: Mutex::new(receiver),
            },
        )
    }
}

impl ShutdownTrigger {
    /// Fires the signal. Firing twice is harmless.
    pub fn trigger(&self) {
        self.sender.send(()).ok();
    }
}

impl ShutdownSignal for ChannelShutdownSignal {
    fn wait(&self) -> Result<(), ShutdownError> {
        let receiver = self.receiver.lock().unwrap_or_else(PoisonError::into_inner);
        if receiver.recv().is_ok() {
            info!(
                target: SERVER_TARGET,
                event = "shutdown_signal",
                "shutdown requested"
            );
        }
        Ok(())
    }
}
