//! Network server options.

use std::time::Duration;

use clap::{Arg, ArgMatches, Command};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::env::EnvSource;
use crate::error::OptionError;
use crate::flags::{self, flag_name};
use crate::option::{ConfigOption, Endpoint, timeout_positive};

const NAMESPACE: &str = "server";
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run mode reported in logs and the startup banner.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ServerMode {
    /// Production defaults.
    #[default]
    Release,
    /// Verbose error bodies.
    Debug,
    /// Used by automated tests.
    Test,
}

/// Options for the request-serving runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServerOptions {
    /// Address to bind.
    pub host: String,
    /// Port to bind; zero picks an ephemeral port.
    pub port: u16,
    /// Run mode.
    pub mode: ServerMode,
    /// Grace period for shutdown, including datasource teardown.
    #[serde(with = "crate::serde_duration")]
    pub shutdown_timeout: Duration,
    /// Idle time allowed between requests on one connection.
    #[serde(with = "crate::serde_duration")]
    pub read_timeout: Duration,
    /// Largest request line accepted.
    pub max_request_bytes: u32,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: String::from("0.0.0.0"),
            port: 8100,
            mode: ServerMode::Release,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            read_timeout: Duration::from_secs(30),
            max_request_bytes: 64 * 1024,
        }
    }
}

impl ServerOptions {
    /// Address the runtime binds to.
    #[must_use]
    pub fn address(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }
}

fn parse_mode(value: &str) -> Result<ServerMode, String> {
    value
        .parse::<ServerMode>()
        .map_err(|_| format!("unsupported server mode `{value}`; expected release, debug or test"))
}

impl ConfigOption for ServerOptions {
    fn namespace(&self) -> &'static str {
        NAMESPACE
    }

    fn add_flags(&self, command: Command, prefix: &str) -> Command {
        let name = |field: &str| flag_name(prefix, NAMESPACE, field);
        let mode_name = name("mode");
        command.args([
            flags::string(name("host"), &self.host, "Address the server binds to."),
            flags::u16(name("port"), self.port, "Port the server binds to. 0 picks a free port."),
            Arg::new(mode_name.clone())
                .long(mode_name)
                .help("Server mode: release, debug or test.")
                .value_parser(parse_mode)
                .default_value(self.mode.to_string()),
            flags::duration(
                name("shutdown-timeout"),
                self.shutdown_timeout,
                "Grace period for shutting the service down.",
            ),
            flags::duration(
                name("read-timeout"),
                self.read_timeout,
                "Idle time allowed between requests on a connection.",
            ),
            flags::u32(
                name("max-request-bytes"),
                self.max_request_bytes,
                "Largest request accepted, in bytes.",
            ),
        ])
    }

    fn apply_matches(&mut self, matches: &ArgMatches, prefix: &str) {
        let name = |field: &str| flag_name(prefix, NAMESPACE, field);
        flags::read(matches, &name("host"), &mut self.host);
        flags::read(matches, &name("port"), &mut self.port);
        flags::read(matches, &name("mode"), &mut self.mode);
        flags::read(matches, &name("shutdown-timeout"), &mut self.shutdown_timeout);
        flags::read(matches, &name("read-timeout"), &mut self.read_timeout);
        flags::read(matches, &name("max-request-bytes"), &mut self.max_request_bytes);
    }

    fn complete(&mut self) -> Result<(), OptionError> {
        self.host = self.host.trim().to_owned();
        if self.shutdown_timeout.is_zero() {
            self.shutdown_timeout = DEFAULT_SHUTDOWN_TIMEOUT;
        }
        Ok(())
    }

    fn validate(&mut self, _env: &dyn EnvSource) -> Result<(), OptionError> {
        let mut errors = Vec::new();
        if self.host.is_empty() {
            errors.push(OptionError::invalid(NAMESPACE, "host", "must not be empty"));
        }
        timeout_positive(&mut errors, NAMESPACE, "read-timeout", self.read_timeout);
        if self.max_request_bytes < 1024 {
            errors.push(OptionError::invalid(
                NAMESPACE,
                "max-request-bytes",
                "must be at least 1024",
            ));
        }
        OptionError::collect(errors)
    }
}
