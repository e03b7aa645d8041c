//! Object pooling for per-frame allocations.
//!
//! Frame-based renderers rebuild the same structures every frame (command
//! streams, scratch item lists). [`ObjectPool`] hands out values that keep
//! their heap capacity between uses: a released value is [`reset`](Poolable::reset)
//! and parked until the next [`acquire`](ObjectPool::acquire).
//!
//! ```
//! use kiln_core::pool::{ObjectPool, Poolable};
//!
//! #[derive(Default)]
//! struct Scratch(Vec<u32>);
//!
//! impl Poolable for Scratch {
//!     fn new_empty() -> Self {
//!         Self::default()
//!     }
//!     fn reset(&mut self) {
//!         self.0.clear();
//!     }
//! }
//!
//! let mut pool = ObjectPool::<Scratch>::new();
//! let mut s = pool.acquire();
//! s.0.extend_from_slice(&[1, 2, 3]);
//! pool.release(s);
//!
//! let s = pool.acquire();
//! assert!(s.0.is_empty());
//! assert!(s.0.capacity() >= 3);
//! ```

/// Trait for types that can be pooled and reused.
pub trait Poolable {
    /// Create a new empty instance for pool initialization.
    fn new_empty() -> Self;

    /// Reset the value to an empty state, preserving allocated capacity.
    fn reset(&mut self);
}

/// Counters describing pool usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Values constructed because the free list was empty.
    pub created: usize,
    /// Values currently handed out.
    pub in_use: usize,
    /// Values waiting in the free list.
    pub available: usize,
}

/// A free list of reusable values.
#[derive(Debug)]
pub struct ObjectPool<T: Poolable> {
    free: Vec<T>,
    created: usize,
    in_use: usize,
}

impl<T: Poolable> Default for ObjectPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Poolable> ObjectPool<T> {
    pub fn new() -> Self {
        Self {
            free: Vec::new(),
            created: 0,
            in_use: 0,
        }
    }

    /// Take a value from the free list, creating one if none is parked.
    pub fn acquire(&mut self) -> T {
        self.in_use += 1;
        match self.free.pop() {
            Some(value) => value,
            None => {
                self.created += 1;
                T::new_empty()
            }
        }
    }

    /// Reset a value and park it for reuse.
    pub fn release(&mut self, mut value: T) {
        value.reset();
        self.in_use = self.in_use.saturating_sub(1);
        self.free.push(value);
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created,
            in_use: self.in_use,
            available: self.free.len(),
        }
    }

    /// Drop every parked value.
    pub fn shrink(&mut self) {
        self.free.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Stream {
        words: Vec<u32>,
        resets: u32,
    }

    impl Poolable for Stream {
        fn new_empty() -> Self {
            Self::default()
        }

        fn reset(&mut self) {
            self.words.clear();
            self.resets += 1;
        }
    }

    #[test]
    fn acquire_creates_when_empty() {
        let mut pool = ObjectPool::<Stream>::new();
        let a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(pool.stats().created, 2);
        assert_eq!(pool.stats().in_use, 2);
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.stats().available, 2);
        assert_eq!(pool.stats().in_use, 0);
    }

    #[test]
    fn released_values_are_reset_and_keep_capacity() {
        let mut pool = ObjectPool::<Stream>::new();
        let mut s = pool.acquire();
        s.words.extend(0..64);
        pool.release(s);

        let s = pool.acquire();
        assert!(s.words.is_empty());
        assert!(s.words.capacity() >= 64);
        assert_eq!(s.resets, 1);
        assert_eq!(pool.stats().created, 1);
    }

    #[test]
    fn shrink_drops_parked_values() {
        let mut pool = ObjectPool::<Stream>::new();
        let s = pool.acquire();
        pool.release(s);
        pool.shrink();
        assert_eq!(pool.stats().available, 0);
    }
}
