//! Live-updatable values shared by every clone of a limiter.
//!
//! Default uses `ArcSwap` so the hot path reads without locking; feature `adaptive-rwlock`
//! switches to a `RwLock`.

use std::sync::Arc;

#[cfg(feature = "adaptive-rwlock")]
use std::sync::RwLock;

#[cfg(not(feature = "adaptive-rwlock"))]
use arc_swap::ArcSwap;

/// Shared handle to a value that can be replaced at runtime. Clones see the same value.
#[derive(Debug)]
pub struct DynamicConfig<T> {
    #[cfg(not(feature = "adaptive-rwlock"))]
    inner: Arc<ArcSwap<T>>,
    #[cfg(feature = "adaptive-rwlock")]
    inner: Arc<RwLock<Arc<T>>>,
}

impl<T> Clone for DynamicConfig<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> DynamicConfig<T> {
    pub fn new(value: T) -> Self {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            Self { inner: Arc::new(ArcSwap::from_pointee(value)) }
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            Self { inner: Arc::new(RwLock::new(Arc::new(value))) }
        }
    }

    /// Snapshot of the current value. A snapshot never changes underneath its holder.
    pub fn get(&self) -> Arc<T> {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            self.inner.load_full()
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            self.inner.read().unwrap_or_else(|p| p.into_inner()).clone()
        }
    }

    /// Replace the value entirely.
    pub fn set(&self, value: T) {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            self.inner.store(Arc::new(value));
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            *self.inner.write().unwrap_or_else(|p| p.into_inner()) = Arc::new(value);
        }
    }

    /// Derive a new value from the current one; the value is left untouched if `f` fails.
    ///
    /// Concurrent updates never overwrite each other: with `ArcSwap`, `f` is re-run against
    /// the newer value whenever another writer got in first.
    pub fn try_update<E, F>(&self, mut f: F) -> Result<Arc<T>, E>
    where
        F: FnMut(&T) -> Result<T, E>,
    {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            let mut current = self.inner.load_full();
            loop {
                let next = Arc::new(f(&current)?);
                let prev = self.inner.compare_and_swap(&current, next.clone());
                if Arc::ptr_eq(&prev, &current) {
                    return Ok(next);
                }
                current = arc_swap::Guard::into_inner(prev);
            }
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            let mut guard = self.inner.write().unwrap_or_else(|p| p.into_inner());
            let next = Arc::new(f(&guard)?);
            *guard = next.clone();
            Ok(next)
        }
    }
}
