//! Environment access used during option validation.

use std::collections::BTreeMap;
use std::sync::Arc;

/// Read-only view of environment variables.
///
/// Validation resolves secrets through this trait so callers can supply a
/// fixed environment without mutating the process state.
pub trait EnvSource: Send + Sync {
    /// Returns the value of `key`, treating empty values as unset.
    fn var(&self, key: &str) -> Option<String>;
}

/// Environment backed by [`std::env`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemEnv;

impl EnvSource for SystemEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|value| !value.is_empty())
    }
}

/// In-memory environment, mostly useful in tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MapEnv {
    vars: BTreeMap<String, String>,
}

impl MapEnv {
    /// Creates an empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a variable.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

impl EnvSource for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).filter(|value| !value.is_empty()).cloned()
    }
}

impl<T> EnvSource for &T
where
    T: EnvSource + ?Sized,
{
    fn var(&self, key: &str) -> Option<String> {
        (**self).var(key)
    }
}

impl<T> EnvSource for Arc<T>
where
    T: EnvSource + ?Sized,
{
    fn var(&self, key: &str) -> Option<String> {
        (**self).var(key)
    }
}
