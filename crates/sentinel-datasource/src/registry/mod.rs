//! The datasource registry.
//!
//! Entries are keyed `kind:name`. Registration stores a copy of the options;
//! clients are created on [`Registry::init_all`], [`Registry::init`] or lazily
//! on first lookup. The entry map and the initialized set only change under
//! the write lock, and a connect always runs while that lock is held, so
//! concurrent lookups of a cold entry dial the store exactly once.

mod typed;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;

use once_cell::sync::OnceCell;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use tracing::{debug, info, warn};

use sentinel_config::{DatasourceOptions, EnvSource, SystemEnv};
use sentinel_context::Context;

use crate::client::{Client, DatasourceClient};
use crate::driver::{ConnectRequest, Driver};
use crate::error::{CloseFailure, RegistryError};
use crate::health::{self, HealthStatus, Snapshot};
use crate::kind::{Kind, KindOptions, make_key};
use crate::tcp::TcpDriver;

pub use typed::TypedView;

pub(crate) const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::registry");

const MAX_HEALTH_PARALLELISM: usize = 16;

/// Lifecycle of one registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    /// Options stored, no client yet.
    Registered,
    /// A live client is published.
    Initialized,
    /// The registry was closed.
    Closed,
}

trait ErasedOptions: Send + Sync {
    fn masked_dsn(&self) -> String;

    /// Completes and validates in place, resolving secrets from `env`.
    fn prepare(&mut self, name: &str, env: &dyn EnvSource) -> Result<(), RegistryError>;

    fn connect_client(
        &self,
        ctx: &Context,
        name: &str,
        driver: &dyn Driver,
    ) -> Result<Arc<dyn DatasourceClient>, RegistryError>;
}

impl<O> ErasedOptions for O
where
    O: KindOptions,
{
    fn masked_dsn(&self) -> String {
        DatasourceOptions::dsn(self)
    }

    fn prepare(&mut self, name: &str, env: &dyn EnvSource) -> Result<(), RegistryError> {
        let invalid = |source| RegistryError::InvalidOptions {
            kind: O::KIND,
            name: name.to_owned(),
            source,
        };
        self.complete().map_err(invalid)?;
        self.validate(env).map_err(invalid)
    }

    fn connect_client(
        &self,
        ctx: &Context,
        name: &str,
        driver: &dyn Driver,
    ) -> Result<Arc<dyn DatasourceClient>, RegistryError> {
        let failed = |source| RegistryError::ConnectFailed {
            kind: O::KIND,
            name: name.to_owned(),
            source,
        };
        ctx.check().map_err(|error| failed(error.into()))?;

        let request = ConnectRequest::from_options(name, self);
        let connection = driver.connect(ctx, &request).map_err(failed)?;
        Ok(Arc::new(Client::new(name, self.clone(), connection)))
    }
}

struct Entry {
    kind: Kind,
    name: String,
    options: Box<dyn ErasedOptions>,
    /// Set once the options passed completion and validation.
    prepared: bool,
    client: Option<Arc<dyn DatasourceClient>>,
    state: EntryState,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<String, Entry>,
    initialized: BTreeSet<String>,
    closed: bool,
}

/// Owns datasource clients, keyed by kind and instance name.
pub struct Registry {
    state: RwLock<State>,
    drivers: HashMap<Kind, Arc<dyn Driver>>,
    default_driver: Arc<dyn Driver>,
    env: Arc<dyn EnvSource>,
    health_parallelism: usize,
    health_pool: OnceCell<Option<ThreadPool>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Creates an empty registry that dials with [`TcpDriver`] and reads
    /// secrets from the process environment.
    #[must_use]
    pub fn new() -> Self {
        let parallelism = thread::available_parallelism()
            .map_or(1, NonZeroUsize::get)
            .min(MAX_HEALTH_PARALLELISM);
        Self {
            state: RwLock::new(State::default()),
            drivers: HashMap::new(),
            default_driver: Arc::new(TcpDriver),
            env: Arc::new(SystemEnv),
            health_parallelism: parallelism,
            health_pool: OnceCell::new(),
        }
    }

    /// Uses `driver` for every datasource of `kind`.
    #[must_use]
    pub fn with_driver(mut self, kind: Kind, driver: impl Driver + 'static) -> Self {
        self.drivers.insert(kind, Arc::new(driver));
        self
    }

    /// Replaces the driver used for kinds without a dedicated one.
    #[must_use]
    pub fn with_default_driver(mut self, driver: impl Driver + 'static) -> Self {
        self.default_driver = Arc::new(driver);
        self
    }

    /// Reads secrets from `env` when an entry's options are validated on its
    /// first connect.
    #[must_use]
    pub fn with_env(mut self, env: impl EnvSource + 'static) -> Self {
        self.env = Arc::new(env);
        self
    }

    /// Caps the number of concurrent health pings.
    #[must_use]
    pub fn with_health_parallelism(mut self, parallelism: usize) -> Self {
        self.health_parallelism = parallelism.max(1);
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn driver_for(&self, kind: Kind) -> &dyn Driver {
        self.drivers
            .get(&kind)
            .unwrap_or(&self.default_driver)
            .as_ref()
    }

    /// Stores a copy of `options` under `kind:name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyRegistered`] for a duplicate key and
    /// [`RegistryError::Closed`] once the registry has been closed.
    pub fn register<O>(&self, name: &str, options: &O) -> Result<(), RegistryError>
    where
        O: KindOptions,
    {
        let key = make_key(O::KIND, name);
        let mut state = self.write();
        if state.closed {
            return Err(RegistryError::Closed);
        }
        if state.entries.contains_key(&key) {
            return Err(RegistryError::AlreadyRegistered {
                kind: O::KIND,
                name: name.to_owned(),
            });
        }
        debug!(
            target: REGISTRY_TARGET,
            event = "registered",
            key = %key,
            dsn = %options.dsn(),
            "datasource registered"
        );
        state.entries.insert(
            key,
            Entry {
                kind: O::KIND,
                name: name.to_owned(),
                options: Box::new(options.clone()),
                prepared: false,
                client: None,
                state: EntryState::Registered,
            },
        );
        Ok(())
    }

    /// Connects every registered entry that has no client yet.
    ///
    /// The batch is atomic: when one connect fails, every client created by
    /// this call is closed again and its entry returns to
    /// [`EntryState::Registered`]. Entries initialised earlier are untouched.
    ///
    /// # Errors
    ///
    /// Returns the first connect or validation failure, or
    /// [`RegistryError::Closed`].
    pub fn init_all(&self, ctx: &Context) -> Result<(), RegistryError> {
        let mut state = self.write();
        if state.closed {
            return Err(RegistryError::Closed);
        }
        let pending: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.client.is_none())
            .map(|(key, _)| key.clone())
            .collect();

        let mut created = Vec::with_capacity(pending.len());
        for key in pending {
            match self.connect_entry(&mut state, ctx, &key) {
                Ok(()) => created.push(key),
                Err(error) => {
                    warn!(
                        target: REGISTRY_TARGET,
                        event = "init_all_rollback",
                        key = %key,
                        rolled_back = created.len(),
                        error = %error,
                        "datasource initialisation failed; rolling back batch"
                    );
                    Self::roll_back(&mut state, &created);
                    return Err(error);
                }
            }
        }
        info!(
            target: REGISTRY_TARGET,
            event = "init_all_complete",
            initialized = created.len(),
            "datasources initialised"
        );
        Ok(())
    }

    fn roll_back(state: &mut State, created: &[String]) {
        for key in created {
            state.initialized.remove(key);
            let Some(entry) = state.entries.get_mut(key) else {
                continue;
            };
            entry.state = EntryState::Registered;
            if let Some(client) = entry.client.take()
                && let Err(error) = client.close()
            {
                warn!(
                    target: REGISTRY_TARGET,
                    event = "rollback_close_failed",
                    key = %key,
                    error = %error,
                    "failed to close datasource during rollback"
                );
            }
        }
    }

    /// Connects the entry at `key` and publishes its client. Callers hold the
    /// write lock.
    fn connect_entry(
        &self,
        state: &mut State,
        ctx: &Context,
        key: &str,
    ) -> Result<(), RegistryError> {
        let Some(entry) = state.entries.get_mut(key) else {
            return Ok(());
        };
        if entry.client.is_some() {
            return Ok(());
        }
        if !entry.prepared {
            entry.options.prepare(&entry.name, self.env.as_ref())?;
            entry.prepared = true;
        }
        let client = entry
            .options
            .connect_client(ctx, &entry.name, self.driver_for(entry.kind))?;
        info!(
            target: REGISTRY_TARGET,
            event = "connected",
            key = %key,
            dsn = %entry.options.masked_dsn(),
            "datasource connected"
        );
        entry.client = Some(client);
        entry.state = EntryState::Initialized;
        state.initialized.insert(key.to_owned());
        Ok(())
    }

    /// Connects one entry. Already initialised entries are left as they are.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotRegistered`], [`RegistryError::Closed`] or
    /// the connect failure.
    pub fn init(&self, ctx: &Context, kind: Kind, name: &str) -> Result<(), RegistryError> {
        self.client_with_context(ctx, kind, name).map(|_| ())
    }

    /// Looks up a client, connecting it with a background context on first
    /// use.
    ///
    /// # Errors
    ///
    /// See [`Registry::client_with_context`].
    pub fn client(&self, kind: Kind, name: &str) -> Result<Arc<dyn DatasourceClient>, RegistryError> {
        self.client_with_context(&Context::background(), kind, name)
    }

    /// Looks up a client, connecting it with `ctx` on first use.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotRegistered`] for an unknown key,
    /// [`RegistryError::Closed`] after [`Registry::close_all`], and
    /// [`RegistryError::InvalidOptions`] or [`RegistryError::ConnectFailed`]
    /// when the lazy connect fails. A failed connect leaves the entry
    /// registered so a later call may retry.
    pub fn client_with_context(
        &self,
        ctx: &Context,
        kind: Kind,
        name: &str,
    ) -> Result<Arc<dyn DatasourceClient>, RegistryError> {
        let key = make_key(kind, name);
        let not_registered = || RegistryError::NotRegistered {
            kind,
            name: name.to_owned(),
        };
        {
            let state = self.read();
            if state.closed {
                return Err(RegistryError::Closed);
            }
            let entry = state.entries.get(&key).ok_or_else(not_registered)?;
            if let Some(client) = &entry.client {
                return Ok(Arc::clone(client));
            }
        }

        let mut state = self.write();
        if state.closed {
            return Err(RegistryError::Closed);
        }
        if !state.entries.contains_key(&key) {
            return Err(not_registered());
        }
        self.connect_entry(&mut state, ctx, &key)?;
        state
            .entries
            .get(&key)
            .and_then(|entry| entry.client.clone())
            .ok_or_else(not_registered)
    }

    /// Typed lookup with a background context.
    ///
    /// # Errors
    ///
    /// See [`Registry::get_with_context`].
    pub fn get<O>(&self, name: &str) -> Result<Arc<Client<O>>, RegistryError>
    where
        O: KindOptions,
    {
        self.get_with_context(&Context::background(), name)
    }

    /// Typed lookup, connecting with `ctx` on first use.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Registry::client_with_context`] and
    /// [`RegistryError::TypeMismatch`] when the stored client is not a
    /// `Client<O>`.
    pub fn get_with_context<O>(
        &self,
        ctx: &Context,
        name: &str,
    ) -> Result<Arc<Client<O>>, RegistryError>
    where
        O: KindOptions,
    {
        self.client_with_context(ctx, O::KIND, name)?
            .into_any()
            .downcast::<Client<O>>()
            .map_err(|_| RegistryError::TypeMismatch {
                kind: O::KIND,
                name: name.to_owned(),
            })
    }

    /// Typed lookup for initialisation paths where failure is unrecoverable.
    ///
    /// # Panics
    ///
    /// Panics with the kind, name and cause when the lookup fails.
    #[must_use]
    pub fn must_get<O>(&self, name: &str) -> Arc<Client<O>>
    where
        O: KindOptions,
    {
        match self.get::<O>(name) {
            Ok(client) => client,
            Err(error) => panic!("datasource {}:{name} is unavailable: {error}", O::KIND),
        }
    }

    /// Returns a per-kind view over this registry.
    #[must_use]
    pub const fn view<O>(&self) -> TypedView<'_, O>
    where
        O: KindOptions,
    {
        TypedView::new(self)
    }

    fn health_pool(&self) -> Option<&ThreadPool> {
        self.health_pool
            .get_or_init(|| {
                ThreadPoolBuilder::new()
                    .num_threads(self.health_parallelism)
                    .thread_name(|index| format!("datasource-health-{index}"))
                    .build()
                    .map_err(|error| {
                        warn!(
                            target: REGISTRY_TARGET,
                            event = "health_pool_unavailable",
                            error = %error,
                            "health worker pool unavailable; using one thread per datasource"
                        );
                    })
                    .ok()
            })
            .as_ref()
    }

    /// Pings every initialised client concurrently.
    ///
    /// The client set is snapshotted under the read lock, which is released
    /// before any ping starts. A failing or panicking ping only affects its
    /// own status.
    #[must_use]
    pub fn health_check_all(&self, ctx: &Context) -> BTreeMap<String, HealthStatus> {
        let snapshot: Snapshot = {
            let state = self.read();
            state
                .initialized
                .iter()
                .filter_map(|key| {
                    let client = state.entries.get(key)?.client.clone()?;
                    Some((key.clone(), client))
                })
                .collect()
        };
        if snapshot.is_empty() {
            return BTreeMap::new();
        }
        let statuses = health::check_all(self.health_pool(), ctx, &snapshot);
        for status in statuses.values().filter(|status| !status.healthy) {
            warn!(
                target: REGISTRY_TARGET,
                event = "unhealthy",
                key = %status.name,
                error = status.error.as_deref().unwrap_or_default(),
                "datasource health check failed"
            );
        }
        statuses
    }

    /// Returns `false` when any initialised datasource fails its ping.
    #[must_use]
    pub fn is_healthy(&self, ctx: &Context) -> bool {
        self.health_check_all(ctx)
            .values()
            .all(|status| status.healthy)
    }

    /// Closes every client and retires the registry.
    ///
    /// Every client is attempted; failures are aggregated. Afterwards lookups
    /// fail with [`RegistryError::Closed`]. Closing an already closed registry
    /// does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CloseFailed`] listing each client that failed
    /// to close.
    pub fn close_all(&self) -> Result<(), RegistryError> {
        let mut state = self.write();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        state.initialized.clear();

        let mut failures = Vec::new();
        for (key, entry) in &mut state.entries {
            entry.state = EntryState::Closed;
            let Some(client) = entry.client.take() else {
                continue;
            };
            match client.close() {
                Ok(()) => debug!(
                    target: REGISTRY_TARGET,
                    event = "closed",
                    key = %key,
                    "datasource closed"
                ),
                Err(error) => failures.push(CloseFailure {
                    kind: entry.kind,
                    name: entry.name.clone(),
                    message: error.to_string(),
                }),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::CloseFailed { failures })
        }
    }

    /// Whether [`Registry::close_all`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.read().closed
    }

    /// Lifecycle state of one entry, `None` when it was never registered.
    #[must_use]
    pub fn state(&self, kind: Kind, name: &str) -> Option<EntryState> {
        self.read()
            .entries
            .get(&make_key(kind, name))
            .map(|entry| entry.state)
    }

    /// Registered instance names grouped by kind, sorted.
    #[must_use]
    pub fn list_registered(&self) -> BTreeMap<Kind, Vec<String>> {
        let state = self.read();
        let mut listed: BTreeMap<Kind, Vec<String>> = BTreeMap::new();
        for entry in state.entries.values() {
            listed.entry(entry.kind).or_default().push(entry.name.clone());
        }
        listed
    }

    /// Keys of the entries with a live client, sorted.
    #[must_use]
    pub fn list_initialized(&self) -> Vec<String> {
        self.read().initialized.iter().cloned().collect()
    }

    /// Masked connection strings keyed by registry key.
    #[must_use]
    pub fn describe(&self) -> BTreeMap<String, String> {
        self.read()
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.options.masked_dsn()))
            .collect()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        formatter
            .debug_struct("Registry")
            .field("entries", &state.entries.keys().collect::<Vec<_>>())
            .field("initialized", &state.initialized)
            .field("closed", &state.closed)
            .field("health_parallelism", &self.health_parallelism)
            .finish_non_exhaustive()
    }
}
