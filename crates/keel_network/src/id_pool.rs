//! # ID Pools
//!
//! Two allocators of small integer identifiers:
//!
//! - [`RecyclingIdPool`]: hands out IDs in ascending order from a saturating
//!   counter and reuses released IDs (lowest first). Used for ephemeral ports.
//! - [`UnpredictableIdPool`]: draws IDs at random so clients cannot guess each
//!   other's session IDs. Gives up after [`MAX_DRAW_ATTEMPTS`] collisions.
//!
//! Neither pool wraps around: running out is reported as
//! [`PoolError::Exhausted`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeSet, HashSet};

/// Random draws attempted before [`UnpredictableIdPool::allocate`] gives up.
pub const MAX_DRAW_ATTEMPTS: usize = 100;

/// Errors produced by the ID pools.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// No ID could be allocated
    #[error("id pool exhausted after {attempts} attempt(s) with {live} id(s) live")]
    Exhausted { attempts: usize, live: usize },
    /// The released ID is not currently allocated from this pool
    #[error("id {0} is not allocated from this pool")]
    NotAllocated(u32),
    /// The requested range is empty
    #[error("invalid id range {min}..={max}")]
    InvalidRange { min: u32, max: u32 },
}

// ============================================================================
// Recycling Pool
// ============================================================================

/// Sequential allocator with a free-list.
#[derive(Debug, Clone)]
pub struct RecyclingIdPool {
    min: u32,
    max: u32,
    /// Next never-issued ID; `None` once the counter has saturated past `max`
    next: Option<u32>,
    free: BTreeSet<u32>,
}

impl RecyclingIdPool {
    /// Creates a pool over the inclusive range `min..=max`.
    pub fn new(min: u32, max: u32) -> Result<Self, PoolError> {
        if min > max {
            return Err(PoolError::InvalidRange { min, max });
        }
        Ok(Self { min, max, next: Some(min), free: BTreeSet::new() })
    }

    pub fn allocate(&mut self) -> Result<u32, PoolError> {
        if let Some(id) = self.free.pop_first() {
            return Ok(id);
        }
        match self.next {
            Some(id) => {
                self.next = id.checked_add(1).filter(|n| *n <= self.max);
                Ok(id)
            }
            None => Err(PoolError::Exhausted { attempts: 1, live: self.in_use() }),
        }
    }

    pub fn release(&mut self, id: u32) -> Result<(), PoolError> {
        if !self.is_allocated(id) {
            return Err(PoolError::NotAllocated(id));
        }
        self.free.insert(id);
        Ok(())
    }

    pub fn is_allocated(&self, id: u32) -> bool {
        self.was_issued(id) && !self.free.contains(&id)
    }

    /// Number of IDs currently handed out.
    pub fn in_use(&self) -> usize {
        self.issued() - self.free.len()
    }

    pub fn capacity(&self) -> u64 {
        u64::from(self.max - self.min) + 1
    }

    fn was_issued(&self, id: u32) -> bool {
        match self.next {
            Some(next) => id >= self.min && id < next,
            None => id >= self.min && id <= self.max,
        }
    }

    fn issued(&self) -> usize {
        match self.next {
            Some(next) => (next - self.min) as usize,
            None => self.capacity() as usize,
        }
    }
}

// ============================================================================
// Unpredictable Pool
// ============================================================================

/// Random allocator that avoids IDs already live.
#[derive(Debug)]
pub struct UnpredictableIdPool<R: Rng = StdRng> {
    min: u32,
    max: u32,
    live: HashSet<u32>,
    rng: R,
}

impl UnpredictableIdPool<StdRng> {
    /// Creates a pool over `min..=max` seeded from the OS entropy source.
    pub fn new(min: u32, max: u32) -> Result<Self, PoolError> {
        Self::with_rng(min, max, StdRng::from_entropy())
    }
}

impl<R: Rng> UnpredictableIdPool<R> {
    pub fn with_rng(min: u32, max: u32, rng: R) -> Result<Self, PoolError> {
        if min > max {
            return Err(PoolError::InvalidRange { min, max });
        }
        Ok(Self { min, max, live: HashSet::new(), rng })
    }

    /// Draws a fresh ID, retrying on collision up to [`MAX_DRAW_ATTEMPTS`] times.
    pub fn allocate(&mut self) -> Result<u32, PoolError> {
        for _ in 0..MAX_DRAW_ATTEMPTS {
            let id = self.rng.gen_range(self.min..=self.max);
            if self.live.insert(id) {
                return Ok(id);
            }
        }
        Err(PoolError::Exhausted { attempts: MAX_DRAW_ATTEMPTS, live: self.live.len() })
    }

    pub fn release(&mut self, id: u32) -> Result<(), PoolError> {
        if self.live.remove(&id) {
            Ok(())
        } else {
            Err(PoolError::NotAllocated(id))
        }
    }

    pub fn contains(&self, id: u32) -> bool {
        self.live.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;
    use rand::RngCore;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Always yields the same value and counts how often it was asked.
    struct StuckRng {
        value: u32,
        draws: Rc<Cell<usize>>,
    }

    impl RngCore for StuckRng {
        fn next_u32(&mut self) -> u32 {
            self.draws.set(self.draws.get() + 1);
            self.value
        }

        fn next_u64(&mut self) -> u64 {
            u64::from(self.next_u32())
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0);
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    #[test]
    fn test_recycling_pool_is_sequential() {
        let mut pool = RecyclingIdPool::new(10, 20).unwrap();
        assert_eq!(pool.allocate(), Ok(10));
        assert_eq!(pool.allocate(), Ok(11));
        assert_eq!(pool.allocate(), Ok(12));
        assert_eq!(pool.in_use(), 3);
    }

    #[test]
    fn test_recycling_pool_reuses_lowest_released() {
        let mut pool = RecyclingIdPool::new(0, 100).unwrap();
        for _ in 0..5 {
            pool.allocate().unwrap();
        }
        pool.release(3).unwrap();
        pool.release(1).unwrap();

        assert_eq!(pool.allocate(), Ok(1));
        assert_eq!(pool.allocate(), Ok(3));
        assert_eq!(pool.allocate(), Ok(5));
    }

    #[test]
    fn test_recycling_pool_saturates_instead_of_wrapping() {
        let mut pool = RecyclingIdPool::new(u32::MAX - 1, u32::MAX).unwrap();
        assert_eq!(pool.allocate(), Ok(u32::MAX - 1));
        assert_eq!(pool.allocate(), Ok(u32::MAX));
        assert!(matches!(pool.allocate(), Err(PoolError::Exhausted { .. })));

        pool.release(u32::MAX).unwrap();
        assert_eq!(pool.allocate(), Ok(u32::MAX));
    }

    #[test]
    fn test_recycling_pool_rejects_bad_release() {
        let mut pool = RecyclingIdPool::new(0, 10).unwrap();
        assert_eq!(pool.release(0), Err(PoolError::NotAllocated(0)));

        let id = pool.allocate().unwrap();
        pool.release(id).unwrap();
        assert_eq!(pool.release(id), Err(PoolError::NotAllocated(id)));
        assert_eq!(pool.release(99), Err(PoolError::NotAllocated(99)));
    }

    #[test]
    fn test_invalid_range() {
        assert_eq!(
            RecyclingIdPool::new(5, 4).unwrap_err(),
            PoolError::InvalidRange { min: 5, max: 4 }
        );
        assert!(UnpredictableIdPool::new(9, 1).is_err());
    }

    #[test]
    fn test_unpredictable_pool_ids_are_unique() {
        let mut pool = UnpredictableIdPool::new(1, 64).unwrap();
        let mut seen = HashSet::new();
        for _ in 0..32 {
            let id = pool.allocate().unwrap();
            assert!((1..=64).contains(&id));
            assert!(seen.insert(id));
        }
        assert_eq!(pool.len(), 32);
    }

    #[test]
    fn test_unpredictable_pool_release() {
        let mut pool = UnpredictableIdPool::with_rng(0, 1000, StepRng::new(42, 0)).unwrap();
        let id = pool.allocate().unwrap();
        assert!(pool.contains(id));
        pool.release(id).unwrap();
        assert!(!pool.contains(id));
        assert_eq!(pool.release(id), Err(PoolError::NotAllocated(id)));
        assert_eq!(pool.allocate(), Ok(id));
    }

    #[test]
    fn test_unpredictable_pool_gives_up_after_max_collisions() {
        let draws = Rc::new(Cell::new(0));
        let rng = StuckRng { value: 7, draws: draws.clone() };
        let mut pool = UnpredictableIdPool::with_rng(1, 1000, rng).unwrap();

        let first = pool.allocate().unwrap();
        assert_eq!(draws.get(), 1);

        let err = pool.allocate().unwrap_err();
        assert_eq!(err, PoolError::Exhausted { attempts: MAX_DRAW_ATTEMPTS, live: 1 });
        assert_eq!(draws.get(), 1 + MAX_DRAW_ATTEMPTS);
        assert_eq!(pool.len(), 1);
        assert!(pool.contains(first));
    }
}
