//! Bounded concurrency pool for node-task dispatch.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use tokio::sync::Semaphore;
use tracing::warn;

use crate::{EdgeTaskError, Result};

/// Counting semaphore whose permits outlive the call that acquired them.
///
/// A permit taken by [`Pool::acquire`] is held until some other task calls
/// [`Pool::release`], typically when the edge reports the final action of a
/// node-task. The pool does not track which caller holds which permit.
#[derive(Clone, Debug)]
pub struct Pool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_flight: Arc<AtomicUsize>,
}

impl Pool {
    /// Creates a pool with `capacity` permits (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Waits for a free permit. Cancel-safe: dropping the future takes nothing.
    pub async fn acquire(&self) -> Result<()> {
        let permit = self.semaphore.acquire().await.map_err(|e| EdgeTaskError::Runtime(e.to_string()))?;
        permit.forget();
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Frees exactly one permit.
    pub fn release(&self) {
        let released = self.in_flight.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok();
        if released {
            self.semaphore.add_permits(1);
        } else {
            warn!(capacity = self.capacity, "release called on a pool with no permits held");
        }
    }

    /// Permits currently held.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::Pool;

    #[tokio::test]
    async fn test_acquire_blocks_at_capacity() {
        let pool = Pool::new(2);
        pool.acquire().await.unwrap();
        pool.acquire().await.unwrap();
        assert_eq!(pool.in_flight(), 2);

        assert!(tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await.is_err());
        assert_eq!(pool.in_flight(), 2);

        pool.release();
        tokio::time::timeout(Duration::from_secs(1), pool.acquire()).await.unwrap().unwrap();
        assert_eq!(pool.in_flight(), 2);
    }

    #[tokio::test]
    async fn test_release_without_holder_keeps_capacity() {
        let pool = Pool::new(1);
        pool.release();
        assert_eq!(pool.in_flight(), 0);

        pool.acquire().await.unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await.is_err());
    }

    #[tokio::test]
    async fn test_zero_capacity_is_clamped() {
        let pool = Pool::new(0);
        tokio::time::timeout(Duration::from_secs(1), pool.acquire()).await.unwrap().unwrap();
        assert_eq!(pool.in_flight(), 1);
    }
}
