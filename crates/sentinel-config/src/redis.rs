//! Redis connection options.

use std::fmt;
use std::time::Duration;

use clap::{ArgMatches, Command};
use serde::{Deserialize, Serialize};

use crate::env::EnvSource;
use crate::error::OptionError;
use crate::flags::{self, flag_name};
use crate::option::{ConfigOption, DatasourceOptions, Endpoint, port_in_range, timeout_positive};
use crate::secret::{Redact, Redacted, mask, resolve_secret};

const NAMESPACE: &str = "redis";
const PASSWORD_ENV: &str = "REDIS_PASSWORD";

/// Options for a Redis server.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RedisOptions {
    /// Instance name used when registering with the datasource registry.
    pub instance: String,
    /// Server host name. Empty leaves Redis unconfigured.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// ACL user name, empty for the default user.
    pub username: String,
    /// Password. Prefer `REDIS_PASSWORD`.
    #[serde(skip_serializing)]
    pub password: String,
    /// Logical database index.
    pub database: u32,
    /// Retries before a command is reported as failed.
    pub max_retries: u32,
    /// Connections kept in the pool.
    pub pool_size: u32,
    /// Idle connections kept open.
    pub min_idle_conns: u32,
    /// Upper bound for establishing a connection.
    #[serde(with = "crate::serde_duration")]
    pub dial_timeout: Duration,
    /// Socket read timeout.
    #[serde(with = "crate::serde_duration")]
    pub read_timeout: Duration,
    /// Socket write timeout.
    #[serde(with = "crate::serde_duration")]
    pub write_timeout: Duration,
}

impl Default for RedisOptions {
    fn default() -> Self {
        Self {
            instance: String::from("default"),
            host: String::new(),
            port: 6379,
            username: String::new(),
            password: String::new(),
            database: 0,
            max_retries: 3,
            pool_size: 10,
            min_idle_conns: 0,
            dial_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(3),
            write_timeout: Duration::from_secs(3),
        }
    }
}

impl fmt::Debug for RedisOptions {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "RedisOptions {}", Redacted(self))
    }
}

impl Redact for RedisOptions {
    fn secrets(&self) -> Vec<(&'static str, &str)> {
        vec![("password", self.password.as_str())]
    }
}

impl ConfigOption for RedisOptions {
    fn namespace(&self) -> &'static str {
        NAMESPACE
    }

    fn add_flags(&self, command: Command, prefix: &str) -> Command {
        let name = |field: &str| flag_name(prefix, NAMESPACE, field);
        command.args([
            flags::string(
                name("instance"),
                &self.instance,
                "Registry instance name for the Redis datasource.",
            ),
            flags::string(
                name("host"),
                &self.host,
                "Hostname of your Redis server. If left blank, the other redis options are ignored.",
            ),
            flags::u16(name("port"), self.port, "The port the Redis server is listening on."),
            flags::string(name("username"), &self.username, "Username for Redis ACL."),
            flags::secret(
                name("password"),
                "Password for Redis. Prefer the REDIS_PASSWORD environment variable.",
            ),
            flags::u32(
                name("database"),
                self.database,
                "Database index to select after connecting.",
            ),
            flags::u32(
                name("max-retries"),
                self.max_retries,
                "Maximum number of retries before giving up.",
            ),
            flags::u32(name("pool-size"), self.pool_size, "Maximum number of socket connections."),
            flags::u32(
                name("min-idle-conns"),
                self.min_idle_conns,
                "Minimum number of idle connections.",
            ),
            flags::duration(
                name("dial-timeout"),
                self.dial_timeout,
                "Timeout for establishing new connections.",
            ),
            flags::duration(name("read-timeout"), self.read_timeout, "Timeout for socket reads."),
            flags::duration(
                name("write-timeout"),
                self.write_timeout,
                "Timeout for socket writes.",
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
        flags::read(matches, &name("max-retries"), &mut self.max_retries);
        flags::read(matches, &name("pool-size"), &mut self.pool_size);
        flags::read(matches, &name("min-idle-conns"), &mut self.min_idle_conns);
        flags::read(matches, &name("dial-timeout"), &mut self.dial_timeout);
        flags::read(matches, &name("read-timeout"), &mut self.read_timeout);
        flags::read(matches, &name("write-timeout"), &mut self.write_timeout);
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
        timeout_positive(&mut errors, NAMESPACE, "dial-timeout", self.dial_timeout);
        if self.pool_size == 0 {
            errors.push(OptionError::invalid(
                NAMESPACE,
                "pool-size",
                "must be greater than zero",
            ));
        }
        if self.min_idle_conns > self.pool_size {
            errors.push(OptionError::invalid(
                NAMESPACE,
                "min-idle-conns",
                format!("{} exceeds pool-size ({})", self.min_idle_conns, self.pool_size),
            ));
        }
        OptionError::collect(errors)
    }
}

impl DatasourceOptions for RedisOptions {
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
        self.dial_timeout
    }

    fn username(&self) -> &str {
        &self.username
    }

    fn database(&self) -> Option<String> {
        Some(self.database.to_string())
    }

    fn dsn(&self) -> String {
        format!(
            "redis://{}:{}@{}:{}/{}",
            self.username,
            mask(&self.password),
            self.host,
            self.port,
            self.database
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MapEnv;
    use rstest::rstest;

    #[rstest]
    fn idle_pool_bound_is_enforced() {
        let mut options = RedisOptions {
            host: "cache".into(),
            pool_size: 4,
            min_idle_conns: 8,
            ..RedisOptions::default()
        };

        let error = options.validate(&MapEnv::new()).expect_err("invalid pool");

        assert!(error.to_string().contains("min-idle-conns"));
    }

    #[rstest]
    fn empty_password_renders_empty_in_dsn() {
        let options = RedisOptions {
            host: "cache".into(),
            ..RedisOptions::default()
        };
        assert_eq!(options.dsn(), "redis://:@cache:6379/0");
    }
}
