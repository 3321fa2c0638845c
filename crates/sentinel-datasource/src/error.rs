//! Errors surfaced by the datasource registry.

use std::fmt;

use thiserror::Error;

use sentinel_config::OptionError;

use crate::driver::DriverError;
use crate::kind::Kind;

/// Errors returned by [`crate::Registry`].
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A datasource with this kind and name already exists.
    #[error("datasource {kind}:{name} is already registered")]
    AlreadyRegistered {
        /// Kind of the duplicate.
        kind: Kind,
        /// Instance name of the duplicate.
        name: String,
    },
    /// No datasource with this kind and name was registered.
    #[error("datasource {kind}:{name} is not registered")]
    NotRegistered {
        /// Requested kind.
        kind: Kind,
        /// Requested instance name.
        name: String,
    },
    /// The registered options failed completion or validation.
    #[error("invalid options for datasource {kind}:{name}: {source}")]
    InvalidOptions {
        /// Kind of the datasource.
        kind: Kind,
        /// Instance name.
        name: String,
        /// Validation failure.
        #[source]
        source: OptionError,
    },
    /// The driver could not establish a connection.
    #[error("failed to connect datasource {kind}:{name}: {source}")]
    ConnectFailed {
        /// Kind of the datasource.
        kind: Kind,
        /// Instance name.
        name: String,
        /// Driver failure.
        #[source]
        source: DriverError,
    },
    /// The registry was closed and accepts no further work.
    #[error("datasource registry is closed")]
    Closed,
    /// The stored client does not have the requested type.
    #[error("datasource {kind}:{name} does not hold the requested client type")]
    TypeMismatch {
        /// Kind of the datasource.
        kind: Kind,
        /// Instance name.
        name: String,
    },
    /// Some clients failed to close; every failure is listed.
    #[error("failed to close {} datasource(s): {}", failures.len(), CloseFailures(failures))]
    CloseFailed {
        /// One entry per client that failed to close.
        failures: Vec<CloseFailure>,
    },
}

impl RegistryError {
    /// Kind and name of the datasource the error refers to, if any.
    #[must_use]
    pub fn datasource(&self) -> Option<(Kind, &str)> {
        match self {
            Self::AlreadyRegistered { kind, name }
            | Self::NotRegistered { kind, name }
            | Self::InvalidOptions { kind, name, .. }
            | Self::ConnectFailed { kind, name, .. }
            | Self::TypeMismatch { kind, name } => Some((*kind, name.as_str())),
            Self::Closed | Self::CloseFailed { .. } => None,
        }
    }
}

/// A client that failed to close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFailure {
    /// Kind of the datasource.
    pub kind: Kind,
    /// Instance name.
    pub name: String,
    /// Rendered driver error.
    pub message: String,
}

impl fmt::Display for CloseFailure {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}: {}", self.kind, self.name, self.message)
    }
}

struct CloseFailures<'a>(&'a [CloseFailure]);

impl fmt::Display for CloseFailures<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, failure) in self.0.iter().enumerate() {
            if index > 0 {
                formatter.write_str("; ")?;
            }
            write!(formatter, "{failure}")?;
        }
        Ok(())
    }
}

/// Errors from the process-wide registry slot.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GlobalError {
    /// A registry was already installed.
    #[error("global datasource registry is already set")]
    AlreadySet,
}
