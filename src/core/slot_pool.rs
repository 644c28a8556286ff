//! Fixed-capacity slot counter.
//!
//! Uses a lock-free `AtomicU32` with compare-and-swap loops so `in_use` can
//! never exceed `capacity` or drop below zero, even when called outside the
//! controller's lock. Capacity is immutable, so one load of `in_use` always
//! yields a consistent view of the pool.

use std::sync::atomic::{AtomicU32, Ordering};

use super::error::UsageError;

/// Counting resource for the number of jobs the GPU can run at once.
#[derive(Debug)]
pub struct SlotPool {
    capacity: u32,
    in_use: AtomicU32,
}

impl SlotPool {
    /// Create a pool with `capacity` free slots.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError::ZeroCapacity`] when `capacity` is 0.
    pub fn new(capacity: u32) -> Result<Self, UsageError> {
        if capacity == 0 {
            return Err(UsageError::ZeroCapacity);
        }
        Ok(Self {
            capacity,
            in_use: AtomicU32::new(0),
        })
    }

    /// Take one slot if any is free. Returns false with no state change otherwise.
    pub fn try_acquire(&self) -> bool {
        let mut current = self.in_use.load(Ordering::Acquire);
        loop {
            if current >= self.capacity {
                return false;
            }
            match self.in_use.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Return one slot to the pool.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError::PoolUnderflow`] when nothing is in use, which means
    /// some caller released a slot it never held.
    pub fn release(&self) -> Result<(), UsageError> {
        let mut current = self.in_use.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return Err(UsageError::PoolUnderflow);
            }
            match self.in_use.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Total number of slots.
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Slots currently granted.
    #[must_use]
    pub fn in_use(&self) -> u32 {
        self.in_use.load(Ordering::Acquire)
    }

    /// Slots currently free.
    #[must_use]
    pub fn available(&self) -> u32 {
        self.capacity.saturating_sub(self.in_use())
    }
}
