//! The process-wide registry slot.
//!
//! Some callers locate the registry by global lookup rather than having it
//! passed in. The slot is set at most once per process; [`reset`] exists for
//! tests.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::error::GlobalError;
use crate::registry::{REGISTRY_TARGET, Registry};

static GLOBAL: RwLock<Option<Arc<Registry>>> = RwLock::new(None);

/// Returns the installed registry, creating a default one on first use.
///
/// Concurrent first calls all observe the same instance. A registry created
/// here occupies the slot, so a later [`set`] fails.
#[must_use]
pub fn get() -> Arc<Registry> {
    if let Some(registry) = GLOBAL
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
    {
        return Arc::clone(registry);
    }
    let mut slot = GLOBAL.write().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(slot.get_or_insert_with(|| {
        debug!(
            target: REGISTRY_TARGET,
            event = "global_default_created",
            "created default global datasource registry"
        );
        Arc::new(Registry::new())
    }))
}

/// Installs `registry` as the process-wide registry.
///
/// # Errors
///
/// Returns [`GlobalError::AlreadySet`] when a registry is already installed;
/// the installed one is left in place.
pub fn set(registry: Arc<Registry>) -> Result<(), GlobalError> {
    let mut slot = GLOBAL.write().unwrap_or_else(PoisonError::into_inner);
    if slot.is_some() {
        return Err(GlobalError::AlreadySet);
    }
    *slot = Some(registry);
    Ok(())
}

/// Installs `registry` or panics.
///
/// # Panics
///
/// Panics when a registry is already installed.
pub fn must_set(registry: Arc<Registry>) {
    if let Err(error) = set(registry) {
        panic!("{error}");
    }
}

/// Whether a registry occupies the slot.
#[must_use]
pub fn is_set() -> bool {
    GLOBAL
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .is_some()
}

/// Empties the slot and returns the previous registry. Intended for tests.
#[must_use = "the previous registry may still hold open clients"]
pub fn reset() -> Option<Arc<Registry>> {
    GLOBAL.write().unwrap_or_else(PoisonError::into_inner).take()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::global_lock;
    use rstest::rstest;
    use std::sync::Barrier;
    use std::thread;

    #[rstest]
    fn second_set_fails_without_replacing() {
        let _guard = global_lock();
        let first = Arc::new(Registry::new());
        let second = Arc::new(Registry::new());

        set(Arc::clone(&first)).expect("first set");
        assert_eq!(set(second), Err(GlobalError::AlreadySet));

        assert!(Arc::ptr_eq(&get(), &first));
    }

    #[rstest]
    fn lazy_default_is_shared_and_counts_as_set() {
        let _guard = global_lock();

        let handles: Vec<_> = (0..8).map(|_| thread::spawn(get)).collect();
        let registries: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .collect();

        assert!(registries.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
        assert!(is_set());
        assert_eq!(set(Arc::new(Registry::new())), Err(GlobalError::AlreadySet));
    }

    #[rstest]
    fn exactly_one_concurrent_setter_wins() {
        let _guard = global_lock();
        let setters = 16;
        let barrier = Arc::new(Barrier::new(setters));

        let handles: Vec<_> = (0..setters)
            .map(|_| {
                let start = Arc::clone(&barrier);
                thread::spawn(move || {
                    start.wait();
                    set(Arc::new(Registry::new())).is_ok()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
    }

    #[rstest]
    #[should_panic(expected = "already set")]
    fn must_set_panics_on_second_install() {
        let _guard = global_lock();
        must_set(Arc::new(Registry::new()));
        must_set(Arc::new(Registry::new()));
    }
}
