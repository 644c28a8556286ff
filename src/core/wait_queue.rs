//! FIFO queue of parked admission waiters.
//!
//! Each waiter owns the sending half of a oneshot channel; the releasing task
//! resolves it with a [`Grant`]. Removal of an abandoned waiter keeps the
//! relative order of everyone behind it.

use std::collections::VecDeque;
use std::fmt;

use tokio::sync::oneshot;
use tokio::time::Instant;

use super::admission::TicketId;

/// Identifier of a parked waiter, unique per controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaiterId(u64);

impl WaiterId {
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for WaiterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "waiter-{}", self.0)
    }
}

/// A slot handed directly from a releasing ticket to a parked waiter.
#[derive(Debug, Clone, Copy)]
pub struct Grant {
    /// Ticket issued for the handed-over slot.
    pub ticket: TicketId,
}

/// A caller parked until a slot is handed over.
#[derive(Debug)]
pub struct Waiter {
    /// Waiter identifier.
    pub id: WaiterId,
    /// Resolved by the releasing task.
    pub grant: oneshot::Sender<Grant>,
    /// When the waiter joined the queue.
    pub enqueued_at: Instant,
}

/// Error returned when the queue has reached its depth bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

/// FIFO wait queue with an optional depth bound.
#[derive(Debug)]
pub struct WaitQueue {
    max_depth: Option<usize>,
    waiters: VecDeque<Waiter>,
}

impl WaitQueue {
    /// Create a queue; `None` means unbounded.
    #[must_use]
    pub fn new(max_depth: Option<usize>) -> Self {
        Self {
            max_depth,
            waiters: VecDeque::new(),
        }
    }

    /// Park a waiter at the back of the queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueFull`] when the depth bound is reached.
    pub fn enqueue(&mut self, waiter: Waiter) -> Result<(), QueueFull> {
        if self.max_depth.is_some_and(|max| self.waiters.len() >= max) {
            return Err(QueueFull);
        }
        self.waiters.push_back(waiter);
        Ok(())
    }

    /// Take the longest-waiting waiter.
    pub fn dequeue(&mut self) -> Option<Waiter> {
        self.waiters.pop_front()
    }

    /// Remove a specific waiter. Returns true if it was still queued.
    pub fn remove(&mut self, id: WaiterId) -> bool {
        match self.waiters.iter().position(|w| w.id == id) {
            Some(index) => {
                self.waiters.remove(index);
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    fn contains(&self, id: WaiterId) -> bool {
        self.waiters.iter().any(|w| w.id == id)
    }

    /// Maximum depth, if bounded.
    #[must_use]
    pub const fn max_depth(&self) -> Option<usize> {
        self.max_depth
    }

    /// Current depth.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Whether nobody is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}
