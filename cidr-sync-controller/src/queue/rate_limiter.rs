use std::{
    borrow::Borrow,
    collections::HashMap,
    hash::Hash,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Per-item exponential backoff: `base * 2^failures`, capped at `max`.
#[derive(Debug)]
pub struct ExponentialBackoff<T> {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<T, u32>>,
}

impl<T: Hash + Eq + Clone> ExponentialBackoff<T> {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Records another failure of `item` and returns how long to wait before retrying it.
    pub fn when(&self, item: &T) -> Duration {
        let mut failures = self.lock();
        let exponent = failures.entry(item.clone()).or_insert(0);
        let delay = 2u32
            .checked_pow(*exponent)
            .and_then(|multiplier| self.base.checked_mul(multiplier))
            .map_or(self.max, |delay| delay.min(self.max));

        *exponent = exponent.saturating_add(1);

        delay
    }

    pub fn forget<Q>(&self, item: &Q)
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().remove(item);
    }

    pub fn num_requeues<Q>(&self, item: &Q) -> u32
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().get(item).copied().unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<T, u32>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Hash + Eq + Clone> Default for ExponentialBackoff<T> {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}
