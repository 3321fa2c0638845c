//! Datasource kinds and registry key encoding.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use sentinel_config::{
    DatasourceOptions, EtcdOptions, MongoDbOptions, MySqlOptions, PostgresOptions, RedisOptions,
};

/// Families of external stores the registry manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// MySQL relational database.
    MySql,
    /// PostgreSQL relational database.
    Postgres,
    /// Redis key-value store.
    Redis,
    /// MongoDB document store.
    MongoDb,
    /// etcd coordination store.
    Etcd,
}

impl Kind {
    /// Every kind, in display order.
    pub const ALL: [Self; 5] = [
        Self::MySql,
        Self::Postgres,
        Self::Redis,
        Self::MongoDb,
        Self::Etcd,
    ];

    /// Lower-case label used in keys and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
            Self::Redis => "redis",
            Self::MongoDb => "mongodb",
            Self::Etcd => "etcd",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Error returned when parsing a datasource kind fails.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unsupported datasource kind: {0}")]
pub struct KindParseError(String);

impl KindParseError {
    /// Returns the value that could not be parsed.
    #[must_use]
    pub fn value(&self) -> &str {
        self.0.as_str()
    }
}

impl FromStr for Kind {
    type Err = KindParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(Self::MySql),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "redis" => Ok(Self::Redis),
            "mongodb" | "mongo" => Ok(Self::MongoDb),
            "etcd" => Ok(Self::Etcd),
            other => Err(KindParseError(other.to_owned())),
        }
    }
}

/// Encodes the registry key `kind:name`.
#[must_use]
pub fn make_key(kind: Kind, name: &str) -> String {
    format!("{kind}:{name}")
}

/// Splits a key on its first `:`. Names may themselves contain `:`.
#[must_use]
pub fn parse_key(key: &str) -> Option<(Kind, &str)> {
    let (kind, name) = key.split_once(':')?;
    Some((kind.parse().ok()?, name))
}

/// Binds an option type to the kind of store it configures.
pub trait KindOptions: DatasourceOptions {
    /// Kind of store these options describe.
    const KIND: Kind;
}

impl KindOptions for MySqlOptions {
    const KIND: Kind = Kind::MySql;
}

impl KindOptions for PostgresOptions {
    const KIND: Kind = Kind::Postgres;
}

impl KindOptions for RedisOptions {
    const KIND: Kind = Kind::Redis;
}

impl KindOptions for MongoDbOptions {
    const KIND: Kind = Kind::MongoDb;
}

impl KindOptions for EtcdOptions {
    const KIND: Kind = Kind::Etcd;
}
