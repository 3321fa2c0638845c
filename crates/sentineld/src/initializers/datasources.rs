//! Builds the datasource registry, connects every configured store and
//! closes them again on shutdown.

use std::sync::Arc;

use tracing::{info, warn};

use sentinel_config::{
    EnvSource, EtcdOptions, MongoDbOptions, MySqlOptions, PostgresOptions,
    RedisOptions,
};
use sentinel_context::Context;
use sentinel_datasource::{Driver, Kind, KindOptions, Registry, RegistryError, global};
use sentinel_graph::{BoxError, Initializer, Shutdowner};

use super::{BOOTSTRAP_TARGET, DATASOURCES, LOGGING, names};
use crate::handles::Handle;
use crate::options::{AppOptions, instance_of};

/// The datasource option groups.
#[derive(Debug, Clone, Default)]
pub(crate) struct DatasourceSet {
    mysql: MySqlOptions,
    postgres: PostgresOptions,
    redis: RedisOptions,
    mongodb: MongoDbOptions,
    etcd: EtcdOptions,
}

impl DatasourceSet {
    pub(crate) fn from_options(options: &AppOptions) -> Self {
        Self {
            mysql: options.mysql.clone(),
            postgres: options.postgres.clone(),
            redis: options.redis.clone(),
            mongodb: options.mongodb.clone(),
            etcd: options.etcd.clone(),
        }
    }

    fn register_configured(&self, registry: &Registry) -> Result<usize, RegistryError> {
        let registered = [
            register_if_configured(registry, &self.mysql)?,
            register_if_configured(registry, &self.postgres)?,
            register_if_configured(registry, &self.redis)?,
            register_if_configured(registry, &self.mongodb)?,
            register_if_configured(registry, &self.etcd)?,
        ];
        Ok(registered.into_iter().filter(|registered| *registered).count())
    }
}

fn register_if_configured<O>(registry: &Registry, options: &O) -> Result<bool, RegistryError>
where
    O: KindOptions,
{
    if !options.is_configured() {
        return Ok(false);
    }
    registry.register(instance_of(options), options)?;
    Ok(true)
}

pub(crate) struct DatasourcesInitializer {
    datasources: DatasourceSet,
    drivers: Vec<(Kind, Arc<dyn Driver>)>,
    env: Arc<dyn EnvSource>,
    slot: Handle<Arc<Registry>>,
    registry: Option<Arc<Registry>>,
}

impl DatasourcesInitializer {
    pub(crate) fn new(
        datasources: DatasourceSet,
        drivers: Vec<(Kind, Arc<dyn Driver>)>,
        env: Arc<dyn EnvSource>,
        slot: Handle<Arc<Registry>>,
    ) -> Self {
        Self {
            datasources,
            drivers,
            env,
            slot,
            registry: None,
        }
    }

    fn build_registry(&self) -> Registry {
        self.drivers.iter().fold(
            Registry::new().with_env(Arc::clone(&self.env)),
            |registry, (kind, driver)| registry.with_driver(*kind, Arc::clone(driver)),
        )
    }
}

impl Initializer for DatasourcesInitializer {
    fn name(&self) -> &str {
        DATASOURCES
    }

    fn dependencies(&self) -> Vec<String> {
        names(&[LOGGING])
    }

    fn initialize(&mut self, ctx: &Context) -> Result<(), BoxError> {
        let registry = Arc::new(self.build_registry());
        if global::set(Arc::clone(&registry)).is_err() {
            warn!(
                target: BOOTSTRAP_TARGET,
                event = "global_registry_occupied",
                "a global datasource registry is already installed; keeping it"
            );
        }
        let registered = self.datasources.register_configured(&registry)?;
        self.slot.publish(Arc::clone(&registry));
        self.registry = Some(Arc::clone(&registry));

        registry.init_all(ctx)?;
        info!(
            target: BOOTSTRAP_TARGET,
            event = "datasources_ready",
            registered,
            initialized = ?registry.list_initialized(),
            "datasources initialized"
        );
        Ok(())
    }

    fn as_shutdowner(&mut self) -> Option<&mut dyn Shutdowner> {
        Some(self)
    }
}

impl Shutdowner for DatasourcesInitializer {
    fn shutdown(&mut self, _ctx: &Context) -> Result<(), BoxError> {
        let Some(registry) = self.registry.take() else {
            return Ok(());
        };
        registry.close_all()?;
        info!(
            target: BOOTSTRAP_TARGET,
            event = "datasources_closed",
            "all datasources closed successfully"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use sentinel_config::MapEnv;
    use sentinel_datasource::EntryState;
    use sentinel_datasource::test_support::{StubDriver, global_lock};

    #[fixture]
    fn datasources() -> DatasourceSet {
        let options = AppOptions {
            redis: RedisOptions {
                host: String::from("cache.internal"),
                ..RedisOptions::default()
            },
            mysql: MySqlOptions {
                host: String::from("db.internal"),
                instance: String::from("primary"),
                ..MySqlOptions::default()
            },
            ..AppOptions::default()
        };
        DatasourceSet::from_options(&options)
    }

    fn initializer(datasources: DatasourceSet, driver: &StubDriver) -> DatasourcesInitializer {
        let shared: Arc<dyn Driver> = Arc::new(driver.clone());
        DatasourcesInitializer::new(
            datasources,
            vec![(Kind::MySql, Arc::clone(&shared)), (Kind::Redis, shared)],
            Arc::new(MapEnv::new()),
            Handle::new(),
        )
    }

    #[rstest]
    fn connects_configured_stores_and_closes_them(datasources: DatasourceSet) {
        let _guard = global_lock();
        let driver = StubDriver::new();
        let mut step = initializer(datasources, &driver);
        let ctx = Context::background();

        step.initialize(&ctx).expect("initialize");
        let registry = step.slot.get().expect("published");

        assert_eq!(registry.state(Kind::MySql, "primary"), Some(EntryState::Initialized));
        assert_eq!(registry.state(Kind::Redis, "default"), Some(EntryState::Initialized));
        assert_eq!(registry.state(Kind::Postgres, "default"), None);
        assert!(global::is_set());

        step.shutdown(&ctx).expect("shutdown");

        assert!(registry.is_closed());
        assert_eq!(driver.closed().len(), 2);
        drop(global::reset());
    }

    #[rstest]
    fn a_failed_connect_still_publishes_the_registry(datasources: DatasourceSet) {
        let _guard = global_lock();
        let driver = StubDriver::new();
        driver.fail_connect("redis:default", "connection refused");
        let mut step = initializer(datasources, &driver);

        let error = step.initialize(&Context::background()).expect_err("connect fails");

        assert!(error.to_string().contains("redis:default"));
        let registry = step.slot.get().expect("published before connecting");
        assert_eq!(registry.state(Kind::MySql, "primary"), Some(EntryState::Registered));
        drop(global::reset());
    }
}
