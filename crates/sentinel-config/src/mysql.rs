//! MySQL connection options.

use std::fmt;
use std::time::Duration;

use clap::{ArgMatches, Command};
use serde::{Deserialize, Serialize};

use crate::env::EnvSource;
use crate::error::OptionError;
use crate::flags::{self, flag_name};
use crate::option::{ConfigOption, DatasourceOptions, Endpoint, port_in_range, timeout_positive};
use crate::secret::{Redact, Redacted, mask, resolve_secret};

const NAMESPACE: &str = "mysql";
const PASSWORD_ENV: &str = "MYSQL_PASSWORD";

/// Options for a MySQL server.
///
/// An empty `host` leaves MySQL unconfigured and the remaining fields are
/// ignored.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MySqlOptions {
    /// Instance name used when registering with the datasource registry.
    pub instance: String,
    /// Server host name.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Login name.
    pub username: String,
    /// Login password. Prefer `MYSQL_PASSWORD`.
    #[serde(skip_serializing)]
    pub password: String,
    /// Schema to select after connecting.
    pub database: String,
    /// Idle connections kept in the pool.
    pub max_idle_connections: u32,
    /// Upper bound on open connections.
    pub max_open_connections: u32,
    /// Maximum lifetime of a pooled connection.
    #[serde(with = "crate::serde_duration")]
    pub max_connection_life_time: Duration,
    /// Upper bound for establishing a connection.
    #[serde(with = "crate::serde_duration")]
    pub connect_timeout: Duration,
}

impl Default for MySqlOptions {
    fn default() -> Self {
        Self {
            instance: String::from("default"),
            host: String::new(),
            port: 3306,
            username: String::new(),
            password: String::new(),
            database: String::new(),
            max_idle_connections: 100,
            max_open_connections: 100,
            max_connection_life_time: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl fmt::Debug for MySqlOptions {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "MySqlOptions {}", Redacted(self))
    }
}

impl Redact for MySqlOptions {
    fn secrets(&self) -> Vec<(&'static str, &str)> {
        vec![("password", self.password.as_str())]
    }
}

impl ConfigOption for MySqlOptions {
    fn namespace(&self) -> &'static str {
        NAMESPACE
    }

    fn add_flags(&self, command: Command, prefix: &str) -> Command {
        let name = |field: &str| flag_name(prefix, NAMESPACE, field);
        command.args([
            flags::string(
                name("instance"),
                &self.instance,
                "Registry instance name for the MySQL datasource.",
            ),
            flags::string(
                name("host"),
                &self.host,
                "MySQL service host address. If left blank, the other mysql options are ignored.",
            ),
            flags::u16(name("port"), self.port, "MySQL service port."),
            flags::string(
                name("username"),
                &self.username,
                "Username for access to mysql service.",
            ),
            flags::secret(
                name("password"),
                "Password for access to mysql. Prefer the MYSQL_PASSWORD environment variable.",
            ),
            flags::string(
                name("database"),
                &self.database,
                "Database name for the server to use.",
            ),
            flags::u32(
                name("max-idle-connections"),
                self.max_idle_connections,
                "Maximum idle connections allowed to connect to mysql.",
            ),
            flags::u32(
                name("max-open-connections"),
                self.max_open_connections,
                "Maximum open connections allowed to connect to mysql.",
            ),
            flags::duration(
                name("max-connection-life-time"),
                self.max_connection_life_time,
                "Maximum connection life time allowed to connect to mysql.",
            ),
            flags::duration(
                name("connect-timeout"),
                self.connect_timeout,
                "Timeout for establishing a mysql connection.",
            ),
        ])
    }

    fn apply_matches(&mut self, matches: &ArgMatches, prefix: &str) {
        let name = |field: &str| flag_name(prefix, NAMESPACE, field);
        flags::read(matches, &name("instance"), &mut self.instance);
        flags::read(matches, &name("host"), &mut self.host);
        flags::read(matches, &name("port"), &mut self.port);
        flags::read(matches, &name("username"), &mut self.username);
        flags::read(matches, &name("password"), &mut self.password);
        flags::read(matches, &name("database"), &mut self.database);
        flags::read(
            matches,
            &name("max-idle-connections"),
            &mut self.max_idle_connections,
        );
        flags::read(
            matches,
            &name("max-open-connections"),
            &mut self.max_open_connections,
        );
        flags::read(
            matches,
            &name("max-connection-life-time"),
            &mut self.max_connection_life_time,
        );
        flags::read(matches, &name("connect-timeout"), &mut self.connect_timeout);
    }

    fn complete(&mut self) -> Result<(), OptionError> {
        self.host = self.host.trim().to_owned();
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
        port_in_range(&mut errors, NAMESPACE, self.port);
        timeout_positive(&mut errors, NAMESPACE, "connect-timeout", self.connect_timeout);
        if self.database.is_empty() {
            errors.push(OptionError::invalid(
                NAMESPACE,
                "database",
                "must be set when mysql is configured",
            ));
        }
        if self.max_idle_connections > self.max_open_connections {
            errors.push(OptionError::invalid(
                NAMESPACE,
                "max-idle-connections",
                format!(
                    "{} exceeds max-open-connections ({})",
                    self.max_idle_connections, self.max_open_connections
                ),
            ));
        }
        OptionError::collect(errors)
    }
}

impl DatasourceOptions for MySqlOptions {
    fn instance(&self) -> &str {
        &self.instance
    }

    fn is_configured(&self) -> bool {
        !self.host.is_empty()
    }

    fn endpoints(&self) -> Vec<Endpoint> {
        if self.is_configured() {
            vec![Endpoint::new(self.host.clone(), self.port)]
        } else {
            Vec::new()
        }
    }

    fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    fn username(&self) -> &str {
        &self.username
    }

    fn database(&self) -> Option<String> {
        Some(self.database.clone()).filter(|database| !database.is_empty())
    }

    fn dsn(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.username,
            mask(&self.password),
            self.host,
            self.port,
            self.database
        )
    }
}
