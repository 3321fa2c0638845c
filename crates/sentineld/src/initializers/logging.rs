//! Installs telemetry and records the startup event.

use tracing::info;

use sentinel_config::{LogOptions, ServerMode};
use sentinel_context::Context;
use sentinel_graph::{BoxError, Initializer};

use super::{BOOTSTRAP_TARGET, LOGGING};
use crate::app::AppInfo;
use crate::handles::Handle;
use crate::telemetry::{self, TelemetryHandle};

pub(crate) struct LoggingInitializer {
    options: LogOptions,
    info: AppInfo,
    mode: ServerMode,
    slot: Handle<TelemetryHandle>,
}

impl LoggingInitializer {
    pub(crate) const fn new(
        options: LogOptions,
        info: AppInfo,
        mode: ServerMode,
        slot: Handle<TelemetryHandle>,
    ) -> Self {
        Self {
            options,
            info,
            mode,
            slot,
        }
    }

    /// Log options with the service identity merged into the initial fields.
    fn effective_options(&self) -> LogOptions {
        let mut options = self.options.clone();
        options
            .initial_fields
            .insert(String::from("service"), self.info.name.clone());
        options
            .initial_fields
            .insert(String::from("version"), self.info.version.clone());
        options
            .initial_fields
            .insert(String::from("mode"), self.mode.to_string());
        options
    }
}

impl Initializer for LoggingInitializer {
    fn name(&self) -> &str {
        LOGGING
    }

    fn initialize(&mut self, _ctx: &Context) -> Result<(), BoxError> {
        let options = self.effective_options();
        let handle = telemetry::initialise(&options)?;
        info!(
            target: BOOTSTRAP_TARGET,
            event = "startup",
            service = %self.info.name,
            version = %self.info.version,
            mode = %self.mode,
            "starting {}",
            self.info.name
        );
        self.slot.publish(handle);
        Ok(())
    }
}
