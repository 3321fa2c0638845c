//! PostgreSQL connection options.

use std::fmt;
use std::time::Duration;

use clap::{ArgMatches, Command};
use serde::{Deserialize, Serialize};

use crate::env::EnvSource;
use crate::error::OptionError;
use crate::flags::{self, flag_name};
use crate::option::{ConfigOption, DatasourceOptions, Endpoint, port_in_range, timeout_positive};
use crate::secret::{Redact, Redacted, mask, resolve_secret};

const NAMESPACE: &str = "postgres";
const PASSWORD_ENV: &str = "POSTGRES_PASSWORD";
const SSL_MODES: [&str; 6] = [
    "disable",
    "allow",
    "prefer",
    "require",
    "verify-ca",
    "verify-full",
];

/// Options for a PostgreSQL server.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PostgresOptions {
    /// Instance name used when registering with the datasource registry.
    pub instance: String,
    /// Server host name. Empty leaves PostgreSQL unconfigured.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Login name.
    pub username: String,
    /// Login password. Prefer `POSTGRES_PASSWORD`.
    #[serde(skip_serializing)]
    pub password: String,
    /// Database to connect to.
    pub database: String,
    /// libpq `sslmode`.
    pub ssl_mode: String,
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

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            instance: String::from("default"),
            host: String::new(),
            port: 5432,
            username: String::new(),
            password: String::new(),
            database: String::new(),
            ssl_mode: String::from("disable"),
            max_idle_connections: 10,
            max_open_connections: 100,
            max_connection_life_time: Duration::from_secs(3600),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl fmt::Debug for PostgresOptions {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "PostgresOptions {}", Redacted(self))
    }
}

impl Redact for PostgresOptions {
    fn secrets(&self) -> Vec<(&'static str, &str)> {
        vec![("password", self.password.as_str())]
    }
}

impl ConfigOption for PostgresOptions {
    fn namespace(&self) -> &'static str {
        NAMESPACE
    }

    fn add_flags(&self, command: Command, prefix: &str) -> Command {
        let name = |field: &str| flag_name(prefix, NAMESPACE, field);
        command.args([
            flags::string(
                name("instance"),
                &self.instance,
                "Registry instance name for the PostgreSQL datasource.",
            ),
            flags::string(
                name("host"),
                &self.host,
                "PostgreSQL host address. If left blank, the other postgres options are ignored.",
            ),
            flags::u16(name("port"), self.port, "PostgreSQL port."),
            flags::string(name("username"), &self.username, "PostgreSQL user."),
            flags::secret(
                name("password"),
                "PostgreSQL password. Prefer the POSTGRES_PASSWORD environment variable.",
            ),
            flags::string(name("database"), &self.database, "PostgreSQL database."),
            flags::string(
                name("ssl-mode"),
                &self.ssl_mode,
                "SSL mode: disable, allow, prefer, require, verify-ca or verify-full.",
            ),
            flags::u32(
                name("max-idle-connections"),
                self.max_idle_connections,
                "Maximum idle connections in the pool.",
            ),
            flags::u32(
                name("max-open-connections"),
                self.max_open_connections,
                "Maximum open connections in the pool.",
            ),
            flags::duration(
                name("max-connection-life-time"),
                self.max_connection_life_time,
                "Maximum lifetime of a pooled connection.",
            ),
            flags::duration(
                name("connect-timeout"),
                self.connect_timeout,
                "Timeout for establishing a postgres connection.",
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
        flags::read(matches, &name("ssl-mode"), &mut self.ssl_mode);
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
        self.ssl_mode = self.ssl_mode.trim().to_ascii_lowercase();
        if self.ssl_mode.is_empty() {
            self.ssl_mode = String::from("disable");
        }
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
                "must be set when postgres is configured",
            ));
        }
        if !SSL_MODES.contains(&self.ssl_mode.as_str()) {
            errors.push(OptionError::invalid(
                NAMESPACE,
                "ssl-mode",
                format!("unsupported mode `{}`", self.ssl_mode),
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

impl DatasourceOptions for PostgresOptions {
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
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.username,
            mask(&self.password),
            self.host,
            self.port,
            self.database,
            self.ssl_mode
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MapEnv;
    use rstest::rstest;

    fn configured() -> PostgresOptions {
        PostgresOptions {
            host: "pg.internal".into(),
            database: "sentinel".into(),
            ..PostgresOptions::default()
        }
    }

    #[rstest]
    #[case::upper("REQUIRE", true)]
    #[case::blank("", true)]
    #[case::unknown("sometimes", false)]
    fn ssl_mode_is_normalised_then_checked(#[case] mode: &str, #[case] valid: bool) {
        let mut options = PostgresOptions {
            ssl_mode: mode.into(),
            ..configured()
        };

        options.complete().expect("complete");

        assert_eq!(options.validate(&MapEnv::new()).is_ok(), valid);
    }

    #[rstest]
    fn complete_is_idempotent() {
        let mut options = PostgresOptions {
            host: "  pg.internal ".into(),
            ssl_mode: " Prefer".into(),
            ..configured()
        };

        options.complete().expect("first complete");
        let once = options.clone();
        options.complete().expect("second complete");

        assert_eq!(options, once);
        assert_eq!(options.host, "pg.internal");
    }
}
