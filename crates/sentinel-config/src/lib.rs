//! Configuration options for the sentinel service scaffolding.
//!
//! Every subsystem exposes an option group implementing [`ConfigOption`].
//! Groups register `clap` flags, absorb the parsed values, fill conditional
//! defaults in [`ConfigOption::complete`] and check themselves in
//! [`ConfigOption::validate`]. Secrets may arrive from the environment
//! (`MYSQL_PASSWORD`, `REDIS_PASSWORD`, ...) and never appear in `Debug`
//! output or the redacted JSON rendering produced by [`redacted_json`].
//!
//! Datasource groups additionally implement [`DatasourceOptions`], which the
//! registry uses to dial endpoints and to describe connections in logs.

mod env;
mod error;
pub mod flags;
mod option;
mod secret;
mod serde_duration;

mod etcd;
mod jwt;
mod logging;
mod mongodb;
mod mysql;
mod postgres;
mod redis;
mod server;

pub use env::{EnvSource, MapEnv, SystemEnv};
pub use error::OptionError;
pub use option::{CompositeOptions, ConfigOption, DatasourceOptions, Endpoint};
pub use secret::{REDACTED, Redact, Redacted, mask, redacted_json, resolve_secret};

pub use etcd::EtcdOptions;
pub use jwt::JwtOptions;
pub use logging::{LogFormat, LogOptions};
pub use mongodb::MongoDbOptions;
pub use mysql::MySqlOptions;
pub use postgres::PostgresOptions;
pub use redis::RedisOptions;
pub use server::{ServerMode, ServerOptions};

pub(crate) const CONFIG_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::options");
