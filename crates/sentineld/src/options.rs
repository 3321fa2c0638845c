//! The full option bag of a sentinel service.

use std::collections::BTreeMap;

use clap::{ArgMatches, Command};

use sentinel_config::{
    CompositeOptions, ConfigOption, DatasourceOptions, EtcdOptions, JwtOptions, LogOptions,
    MongoDbOptions, MySqlOptions, PostgresOptions, RedisOptions, ServerOptions,
};
use sentinel_datasource::{Kind, make_key};

/// Every option group the bootstrap pipeline consumes.
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    /// Telemetry.
    pub log: LogOptions,
    /// Request-serving runtime.
    pub server: ServerOptions,
    /// Token authentication.
    pub jwt: JwtOptions,
    /// MySQL datasource.
    pub mysql: MySqlOptions,
    /// PostgreSQL datasource.
    pub postgres: PostgresOptions,
    /// Redis datasource.
    pub redis: RedisOptions,
    /// MongoDB datasource.
    pub mongodb: MongoDbOptions,
    /// etcd datasource.
    pub etcd: EtcdOptions,
}

impl AppOptions {
    /// Registers every group's flags on `command`.
    #[must_use]
    pub fn command(&self, command: Command) -> Command {
        CompositeOptions::add_flags(self, command, "")
    }

    /// Absorbs parsed flags into every group.
    pub fn absorb(&mut self, matches: &ArgMatches) {
        CompositeOptions::apply_matches(self, matches, "");
    }

    /// Configured datasources keyed `kind:instance`, with masked connection
    /// strings.
    #[must_use]
    pub fn configured_datasources(&self) -> BTreeMap<String, String> {
        let mut described = BTreeMap::new();
        describe(&mut described, Kind::MySql, &self.mysql);
        describe(&mut described, Kind::Postgres, &self.postgres);
        describe(&mut described, Kind::Redis, &self.redis);
        describe(&mut described, Kind::MongoDb, &self.mongodb);
        describe(&mut described, Kind::Etcd, &self.etcd);
        described
    }
}

fn describe<O>(described: &mut BTreeMap<String, String>, kind: Kind, options: &O)
where
    O: DatasourceOptions,
{
    if options.is_configured() {
        described.insert(make_key(kind, instance_of(options)), options.dsn());
    }
}

/// Instance name a datasource option registers under.
pub(crate) fn instance_of<O>(options: &O) -> &str
where
    O: DatasourceOptions,
{
    let name = options.instance();
    if name.trim().is_empty() { "default" } else { name }
}

impl CompositeOptions for AppOptions {
    fn groups(&self) -> Vec<&dyn ConfigOption> {
        vec![
            &self.log,
            &self.server,
            &self.jwt,
            &self.mysql,
            &self.postgres,
            &self.redis,
            &self.mongodb,
            &self.etcd,
        ]
    }

    fn groups_mut(&mut self) -> Vec<&mut dyn ConfigOption> {
        vec![
            &mut self.log,
            &mut self.server,
            &mut self.jwt,
            &mut self.mysql,
            &mut self.postgres,
            &mut self.redis,
            &mut self.mongodb,
            &mut self.etcd,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use sentinel_config::MapEnv;

    #[rstest]
    fn flags_from_every_group_are_registered() {
        let options = AppOptions::default();
        let command = options.command(Command::new("svc"));
        let names: Vec<String> = command
            .get_arguments()
            .filter_map(|arg| arg.get_long().map(str::to_owned))
            .collect();

        for expected in ["log.level", "server.port", "jwt.disable-auth", "mysql.host", "etcd.endpoints"] {
            assert!(names.iter().any(|name| name == expected), "missing --{expected}");
        }
    }

    #[rstest]
    fn only_configured_datasources_are_described() {
        let mut options = AppOptions::default();
        options.redis.host = String::from("cache.internal");
        options.redis.password = String::from("hunter2");

        let described = options.configured_datasources();

        assert_eq!(described.keys().collect::<Vec<_>>(), ["redis:default"]);
        let dsn = described.get("redis:default").map_or("", String::as_str);
        assert!(!dsn.contains("hunter2"), "secret leaked: {dsn}");
    }

    #[rstest]
    fn validation_collects_failures_across_groups() {
        let mut options = AppOptions::default();
        options.server.host = String::new();
        options.jwt.key = String::from("short");

        let error = CompositeOptions::validate(&mut options, &MapEnv::new()).expect_err("invalid");

        assert_eq!(error.failures().len(), 2, "{error}");
    }
}
