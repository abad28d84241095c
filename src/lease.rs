//! Reference-counted, lazily loaded per-dataset serving state.
//!
//! A server handling several datasets keeps each one's state (typically a
//! [`TileIndex`](crate::TileIndex)) loaded only while it is in use. Every
//! access to a dataset renews its lease and ages every other lease by one;
//! a lease that ages to zero is released.

use crate::config::ServingConfig;
use crate::error::Result;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;

#[derive(Debug)]
struct Lease<T> {
    value: Arc<T>,
    counter: u32,
}

/// Lazily loads values by name and releases the ones not accessed recently.
///
/// # Examples
///
/// ```rust
/// use quadmap::LeaseManager;
///
/// let leases: LeaseManager<String> = LeaseManager::new(2);
/// let a = leases.acquire("a", || Ok("state of a".to_string()))?;
/// assert_eq!(*a, "state of a");
///
/// leases.acquire("b", || Ok("state of b".to_string()))?;
/// leases.acquire("b", || Ok("state of b".to_string()))?;
/// // Two accesses elsewhere released "a".
/// assert!(!leases.is_loaded("a"));
/// # Ok::<(), quadmap::QuadmapError>(())
/// ```
#[derive(Debug)]
pub struct LeaseManager<T> {
    leases: Mutex<FxHashMap<String, Lease<T>>>,
    counter_max: u32,
}

impl<T> LeaseManager<T> {
    pub fn new(counter_max: u32) -> Self {
        Self {
            leases: Mutex::new(FxHashMap::default()),
            counter_max: counter_max.max(1),
        }
    }

    pub fn from_config(config: &ServingConfig) -> Self {
        Self::new(config.lease_counter_max)
    }

    /// Value for `name`, loading it with `load` if it is not held.
    ///
    /// A failed load leaves every lease untouched.
    pub fn acquire<F>(&self, name: &str, load: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Result<T>,
    {
        let mut leases = self.leases.lock();

        let value = match leases.get(name) {
            Some(lease) => Arc::clone(&lease.value),
            None => {
                let value = Arc::new(load()?);
                log::debug!("Loaded serving state for {}", name);
                value
            }
        };

        leases.retain(|other, lease| {
            if other == name {
                return true;
            }
            lease.counter = lease.counter.saturating_sub(1);
            if lease.counter == 0 {
                log::debug!("Released serving state for {}", other);
            }
            lease.counter > 0
        });

        leases.insert(
            name.to_string(),
            Lease {
                value: Arc::clone(&value),
                counter: self.counter_max,
            },
        );
        Ok(value)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.leases.lock().contains_key(name)
    }

    /// Remaining accesses before `name` is released.
    pub fn counter(&self, name: &str) -> Option<u32> {
        self.leases.lock().get(name).map(|lease| lease.counter)
    }

    /// Names currently held, sorted.
    pub fn loaded(&self) -> Vec<String> {
        let mut names: Vec<String> = self.leases.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop `name` now. Clones of its value already handed out stay valid.
    pub fn release(&self, name: &str) -> bool {
        self.leases.lock().remove(name).is_some()
    }
}
