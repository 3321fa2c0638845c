//! Driver doubles shared by this crate's tests and by dependent crates.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use sentinel_context::Context;

use crate::driver::{ConnectRequest, Connection, Driver, DriverError, KeyValue};
use crate::global;
use crate::kind::make_key;

static GLOBAL_LOCK: Mutex<()> = Mutex::new(());

/// Serialises tests that touch the process-wide registry and empties the
/// slot before handing out the guard.
pub fn global_lock() -> MutexGuard<'static, ()> {
    let guard = GLOBAL_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    drop(global::reset());
    guard
}

#[derive(Default)]
struct StubState {
    connects: HashMap<String, usize>,
    connect_failures: HashMap<String, String>,
    ping_failures: HashMap<String, String>,
    close_failures: HashMap<String, String>,
    closed: Vec<String>,
    delay: Duration,
    key_value: bool,
}

/// Scriptable driver. Clones share state, so a test keeps one handle while
/// the registry owns another.
#[derive(Clone, Default)]
pub struct StubDriver {
    state: Arc<Mutex<StubState>>,
}

impl StubDriver {
    /// Creates a driver whose connects and pings succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every connect wait `delay`, honouring the context.
    #[must_use]
    pub fn with_delay(self, delay: Duration) -> Self {
        self.lock().delay = delay;
        self
    }

    /// Gives connections an in-memory key-value capability.
    #[must_use]
    pub fn with_key_value(self) -> Self {
        self.lock().key_value = true;
        self
    }

    /// Fails connects for `key` (`kind:name`).
    pub fn fail_connect(&self, key: &str, message: &str) {
        self.lock()
            .connect_failures
            .insert(key.to_owned(), message.to_owned());
    }

    /// Fails pings for `key`.
    pub fn fail_ping(&self, key: &str, message: &str) {
        self.lock()
            .ping_failures
            .insert(key.to_owned(), message.to_owned());
    }

    /// Fails closes for `key`.
    pub fn fail_close(&self, key: &str, message: &str) {
        self.lock()
            .close_failures
            .insert(key.to_owned(), message.to_owned());
    }

    /// Clears every scripted failure for `key`.
    pub fn heal(&self, key: &str) {
        let mut state = self.lock();
        state.connect_failures.remove(key);
        state.ping_failures.remove(key);
        state.close_failures.remove(key);
    }

    /// Connect attempts made for `key`.
    #[must_use]
    pub fn connects(&self, key: &str) -> usize {
        self.lock().connects.get(key).copied().unwrap_or_default()
    }

    /// Connect attempts across all keys.
    #[must_use]
    pub fn total_connects(&self) -> usize {
        self.lock().connects.values().sum()
    }

    /// Keys whose connection was closed, in close order.
    #[must_use]
    pub fn closed(&self) -> Vec<String> {
        self.lock().closed.clone()
    }
}

impl Driver for StubDriver {
    fn connect(
        &self,
        ctx: &Context,
        request: &ConnectRequest,
    ) -> Result<Box<dyn Connection>, DriverError> {
        let key = make_key(request.kind(), request.name());
        let (delay, key_value) = {
            let mut state = self.lock();
            *state.connects.entry(key.clone()).or_default() += 1;
            (state.delay, state.key_value)
        };
        ctx.sleep(delay)?;
        if let Some(message) = self.lock().connect_failures.get(&key) {
            return Err(DriverError::other(message.clone()));
        }
        Ok(Box::new(StubConnection {
            key,
            driver: self.clone(),
            store: key_value.then(MemoryKeyValue::default),
        }))
    }
}

struct StubConnection {
    key: String,
    driver: StubDriver,
    store: Option<MemoryKeyValue>,
}

impl Connection for StubConnection {
    fn ping(&self, ctx: &Context) -> Result<(), DriverError> {
        ctx.check()?;
        match self.driver.lock().ping_failures.get(&self.key) {
            Some(message) => Err(DriverError::other(message.clone())),
            None => Ok(()),
        }
    }

    fn close(&self) -> Result<(), DriverError> {
        let mut state = self.driver.lock();
        state.closed.push(self.key.clone());
        match state.close_failures.get(&self.key) {
            Some(message) => Err(DriverError::other(message.clone())),
            None => Ok(()),
        }
    }

    fn key_value(&self) -> Option<&dyn KeyValue> {
        self.store.as_ref().map(|store| store as &dyn KeyValue)
    }
}

type Stored = (Vec<u8>, Option<Instant>);

#[derive(Default)]
struct MemoryKeyValue {
    values: Mutex<HashMap<String, Stored>>,
}

impl MemoryKeyValue {
    fn values(&self) -> MutexGuard<'_, HashMap<String, Stored>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValue for MemoryKeyValue {
    fn get(&self, ctx: &Context, key: &str) -> Result<Option<Vec<u8>>, DriverError> {
        ctx.check()?;
        let mut values = self.values();
        let expired = values
            .get(key)
            .and_then(|(_, expires)| *expires)
            .is_some_and(|expires| Instant::now() >= expires);
        if expired {
            values.remove(key);
            return Ok(None);
        }
        Ok(values.get(key).map(|(value, _)| value.clone()))
    }

    fn set(
        &self,
        ctx: &Context,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), DriverError> {
        ctx.check()?;
        let expires = ttl.and_then(|lifetime| Instant::now().checked_add(lifetime));
        self.values()
            .insert(key.to_owned(), (value.to_vec(), expires));
        Ok(())
    }

    fn delete(&self, ctx: &Context, key: &str) -> Result<bool, DriverError> {
        ctx.check()?;
        Ok(self.values().remove(key).is_some())
    }
}
