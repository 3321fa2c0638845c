//! The option lifecycle shared by every configuration group.
//!
//! Options move through `add_flags → parse → apply_matches → complete →
//! validate → use`. Skipping a step is a programming error: `validate`
//! assumes `complete` has already filled conditional defaults.

use std::fmt;
use std::time::Duration;

use clap::{ArgMatches, Command};
use serde::{Deserialize, Serialize};

use crate::env::EnvSource;
use crate::error::OptionError;
use crate::secret::Redact;

/// One configuration group, for example `mysql` or `server`.
pub trait ConfigOption {
    /// Flag namespace for this group.
    fn namespace(&self) -> &'static str;

    /// Registers one flag per field under `<prefix><namespace>.`.
    ///
    /// The flag defaults are the option's current values.
    #[must_use]
    fn add_flags(&self, command: Command, prefix: &str) -> Command;

    /// Copies parsed flag values back into the option.
    fn apply_matches(&mut self, matches: &ArgMatches, prefix: &str);

    /// Fills conditional defaults. Idempotent; performs no I/O.
    ///
    /// # Errors
    ///
    /// Returns an error when a default cannot be derived.
    fn complete(&mut self) -> Result<(), OptionError> {
        Ok(())
    }

    /// Checks structural constraints and resolves secrets from `env`.
    ///
    /// # Errors
    ///
    /// Returns every failed constraint, naming the option and field.
    fn validate(&mut self, env: &dyn EnvSource) -> Result<(), OptionError>;
}

/// An option bag made of several [`ConfigOption`] groups.
///
/// The provided methods drive every group through the lifecycle in
/// declaration order.
pub trait CompositeOptions {
    /// Borrows each group.
    fn groups(&self) -> Vec<&dyn ConfigOption>;

    /// Mutably borrows each group.
    fn groups_mut(&mut self) -> Vec<&mut dyn ConfigOption>;

    /// Registers the flags of every group.
    #[must_use]
    fn add_flags(&self, command: Command, prefix: &str) -> Command {
        self.groups()
            .into_iter()
            .fold(command, |built, group| group.add_flags(built, prefix))
    }

    /// Applies parsed values to every group.
    fn apply_matches(&mut self, matches: &ArgMatches, prefix: &str) {
        for group in self.groups_mut() {
            group.apply_matches(matches, prefix);
        }
    }

    /// Completes every group, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first completion error.
    fn complete(&mut self) -> Result<(), OptionError> {
        for group in self.groups_mut() {
            group.complete()?;
        }
        Ok(())
    }

    /// Validates every group and reports all failures together.
    ///
    /// # Errors
    ///
    /// Returns the collected validation errors.
    fn validate(&mut self, env: &dyn EnvSource) -> Result<(), OptionError> {
        let errors = self
            .groups_mut()
            .into_iter()
            .filter_map(|group| group.validate(env).err())
            .collect();
        OptionError::collect(errors)
    }
}

/// Network address of a datasource server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Creates an endpoint.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `host[:port]`, falling back to `default_port`.
    ///
    /// Returns `None` for blank input or an unparsable port.
    #[must_use]
    pub fn parse(value: &str, default_port: u16) -> Option<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return None;
        }
        match trimmed.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => {
                let parsed = port.parse().ok()?;
                Some(Self::new(host, parsed))
            }
            _ => Some(Self::new(trimmed, default_port)),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.host, self.port)
    }
}

/// Options describing how to reach one external store.
pub trait DatasourceOptions:
    ConfigOption + Redact + Clone + fmt::Debug + Send + Sync + 'static
{
    /// Name the store registers under, `default` unless configured.
    fn instance(&self) -> &str;

    /// Whether enough is set for the store to be used at all.
    fn is_configured(&self) -> bool;

    /// Servers to dial, in preference order.
    fn endpoints(&self) -> Vec<Endpoint>;

    /// Upper bound for establishing a connection.
    fn connect_timeout(&self) -> Duration;

    /// Login name, empty when anonymous.
    fn username(&self) -> &str;

    /// Logical database, when the store has one.
    fn database(&self) -> Option<String> {
        None
    }

    /// Connection string with the secret masked, suitable for logs.
    fn dsn(&self) -> String;
}

pub(crate) fn port_in_range(
    errors: &mut Vec<OptionError>,
    option: &'static str,
    port: u16,
) {
    if port == 0 {
        errors.push(OptionError::invalid(
            option,
            "port",
            "must be between 1 and 65535",
        ));
    }
}

pub(crate) fn timeout_positive(
    errors: &mut Vec<OptionError>,
    option: &'static str,
    field: &'static str,
    value: Duration,
) {
    if value.is_zero() {
        errors.push(OptionError::invalid(option, field, "must be greater than zero"));
    }
}
