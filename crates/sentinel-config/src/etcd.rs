//! etcd cluster options.

use std::fmt;
use std::time::Duration;

use clap::{ArgMatches, Command};
use serde::{Deserialize, Serialize};

use crate::env::EnvSource;
use crate::error::OptionError;
use crate::flags::{self, flag_name};
use crate::option::{ConfigOption, DatasourceOptions, Endpoint, timeout_positive};
use crate::secret::{Redact, Redacted, mask, resolve_secret};

const NAMESPACE: &str = "etcd";
const PASSWORD_ENV: &str = "ETCD_PASSWORD";
const DEFAULT_PORT: u16 = 2379;

/// Options for an etcd cluster.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EtcdOptions {
    /// Instance name used when registering with the datasource registry.
    pub instance: String,
    /// Cluster members as `host[:port]`. Empty leaves etcd unconfigured.
    pub endpoints: Vec<String>,
    /// Login name.
    pub username: String,
    /// Password. Prefer `ETCD_PASSWORD`.
    #[serde(skip_serializing)]
    pub password: String,
    /// Upper bound for establishing a connection.
    #[serde(with = "crate::serde_duration")]
    pub dial_timeout: Duration,
    /// Interval between keep-alive pings.
    #[serde(with = "crate::serde_duration")]
    pub dial_keep_alive_time: Duration,
    /// Wait for a keep-alive response before closing.
    #[serde(with = "crate::serde_duration")]
    pub dial_keep_alive_timeout: Duration,
    /// Per-request timeout.
    #[serde(with = "crate::serde_duration")]
    pub request_timeout: Duration,
}

impl Default for EtcdOptions {
    fn default() -> Self {
        Self {
            instance: String::from("default"),
            endpoints: Vec::new(),
            username: String::new(),
            password: String::new(),
            dial_timeout: Duration::from_secs(5),
            dial_keep_alive_time: Duration::from_secs(30),
            dial_keep_alive_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl fmt::Debug for EtcdOptions {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "EtcdOptions {}", Redacted(self))
    }
}

impl Redact for EtcdOptions {
    fn secrets(&self) -> Vec<(&'static str, &str)> {
        vec![("password", self.password.as_str())]
    }
}

impl ConfigOption for EtcdOptions {
    fn namespace(&self) -> &'static str {
        NAMESPACE
    }

    fn add_flags(&self, command: Command, prefix: &str) -> Command {
        let name = |field: &str| flag_name(prefix, NAMESPACE, field);
        command.args([
            flags::string(
                name("instance"),
                &self.instance,
                "Registry instance name for the etcd datasource.",
            ),
            flags::list(
                name("endpoints"),
                &self.endpoints,
                "Comma separated etcd endpoints. If left empty, the other etcd options are ignored.",
            ),
            flags::string(name("username"), &self.username, "Username for etcd authentication."),
            flags::secret(
                name("password"),
                "Password for etcd. Prefer the ETCD_PASSWORD environment variable.",
            ),
            flags::duration(
                name("dial-timeout"),
                self.dial_timeout,
                "Timeout for establishing a connection.",
            ),
            flags::duration(
                name("dial-keep-alive-time"),
                self.dial_keep_alive_time,
                "Interval between keep-alive pings.",
            ),
            flags::duration(
                name("dial-keep-alive-timeout"),
                self.dial_keep_alive_timeout,
                "Time to wait for a keep-alive response.",
            ),
            flags::duration(
                name("request-timeout"),
                self.request_timeout,
                "Timeout for a single request.",
            ),
        ])
    }

    fn apply_matches(&mut self, matches: &ArgMatches, prefix: &str) {
        let name = |field: &str| flag_name(prefix, NAMESPACE, field);
        flags::read(matches, &name("instance"), &mut self.instance);
        flags::read_list(matches, &name("endpoints"), &mut self.endpoints);
        flags::read(matches, &name("username"), &mut self.username);
        flags::read(matches, &name("password"), &mut self.password);
        flags::read(matches, &name("dial-timeout"), &mut self.dial_timeout);
        flags::read(
            matches,
            &name("dial-keep-alive-time"),
            &mut self.dial_keep_alive_time,
        );
        flags::read(
            matches,
            &name("dial-keep-alive-timeout"),
            &mut self.dial_keep_alive_timeout,
        );
        flags::read(matches, &name("request-timeout"), &mut self.request_timeout);
    }

    fn complete(&mut self) -> Result<(), OptionError> {
        self.endpoints = self
            .endpoints
            .iter()
            .map(|endpoint| endpoint.trim().to_owned())
            .filter(|endpoint| !endpoint.is_empty())
            .collect();
        if self.instance.trim().is_empty() {
            self.instance = String::from("default");
        }
        Ok(())
    }

    fn validate(&mut self, env: &dyn EnvSource) -> Result<(), OptionError> {
        resolve_secret(NAMESPACE, PASSWORD_ENV, &mut self.password, env);
        if !self.is_configured() {
            return Ok(());
        }

        let mut errors = Vec::new();
        for endpoint in &self.endpoints {
            if Endpoint::parse(strip_scheme(endpoint), DEFAULT_PORT).is_none() {
                errors.push(OptionError::invalid(
                    NAMESPACE,
                    "endpoints",
                    format!("`{endpoint}` is not a valid host[:port]"),
                ));
            }
        }
        timeout_positive(&mut errors, NAMESPACE, "dial-timeout", self.dial_timeout);
        if !self.username.is_empty() && self.password.is_empty() {
            errors.push(OptionError::invalid(
                NAMESPACE,
                "password",
                "required when username is set",
            ));
        }
        OptionError::collect(errors)
    }
}

fn strip_scheme(endpoint: &str) -> &str {
    endpoint
        .split_once("://")
        .map_or(endpoint, |(_, address)| address)
}

impl DatasourceOptions for EtcdOptions {
    fn instance(&self) -> &str {
        &self.instance
    }

    fn is_configured(&self) -> bool {
        self.endpoints.iter().any(|endpoint| !endpoint.trim().is_empty())
    }

    fn endpoints(&self) -> Vec<Endpoint> {
        self.endpoints
            .iter()
            .filter_map(|endpoint| Endpoint::parse(strip_scheme(endpoint), DEFAULT_PORT))
            .collect()
    }

    fn connect_timeout(&self) -> Duration {
        self.dial_timeout
    }

    fn username(&self) -> &str {
        &self.username
    }

    fn dsn(&self) -> String {
        format!(
            "etcd://{}:{}@{}",
            self.username,
            mask(&self.password),
            self.endpoints.join(",")
        )
    }
}
