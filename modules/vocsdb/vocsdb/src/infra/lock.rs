//! A thin wrapper turning a failed `parking_lot::Mutex::try_lock_for` into
//! the canonical taxonomy's transient `Processing` error, per the
//! concurrency model in §5: a bounded try-lock with a configurable timeout
//! that never blocks unboundedly, and always releases on every exit path
//! via the guard's `Drop`.

use std::time::Duration;

use parking_lot::Mutex;
use vocsdb_errors::DispatchError;

/// A `Mutex<T>` whose only access method is a bounded try-lock.
pub struct TryLockGuard<T> {
    inner: Mutex<T>,
}

impl<T> TryLockGuard<T> {
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Acquire the lock within `timeout` and run `f` against the guarded
    /// value. A failed acquisition surfaces as a transient, retryable
    /// `Processing` error — never a panic, never an unbounded block.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Processing` if the lock is not acquired
    /// within `timeout`.
    pub fn with_lock<F, R>(&self, timeout: Duration, f: F) -> Result<R, DispatchError>
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut guard = self
            .inner
            .try_lock_for(timeout)
            .ok_or_else(|| DispatchError::processing("lock acquisition timed out"))?;
        Ok(f(&mut guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_lock_runs_closure_and_returns_value() {
        let guard = TryLockGuard::new(0_i32);
        let result = guard.with_lock(Duration::from_millis(50), |v| {
            *v += 1;
            *v
        });
        assert_eq!(result.unwrap(), 1);
    }

    #[test]
    fn contended_lock_times_out_as_processing_error() {
        let guard = TryLockGuard::new(0_i32);
        let held = guard.inner.lock();
        let result = guard.with_lock(Duration::from_millis(10), |v| *v);
        assert!(result.is_err());
        drop(held);
    }
}
