//! Admission controller: grant, queue, or deny requests for a GPU slot.
//!
//! All mutable admission state (outstanding tickets and the FIFO wait queue)
//! lives behind one `parking_lot::Mutex`. The slot counter itself is a
//! lock-free [`SlotPool`] so status reads never take the lock.
//!
//! A release never makes its slot visible to newcomers while someone is
//! parked: the slot is handed straight to the head of the queue by resolving
//! that waiter's oneshot channel. New arrivals only take the fast path when
//! the queue is empty, which is what keeps admission first-come-first-served.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::{AdmissionError, UsageError};
use super::slot_pool::SlotPool;
use super::wait_queue::{Grant, WaitQueue, Waiter, WaiterId};

/// Default upper bound on how long a caller may ask to wait.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(600);

/// Identifier of a granted slot, unique per controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TicketId(u64);

impl TicketId {
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Numeric value of the identifier.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ticket-{}", self.0)
    }
}

/// How a caller wants to be treated when no slot is free.
#[derive(Debug, Clone, Default)]
pub struct AdmissionRequest {
    /// Park until a slot frees instead of failing with `Busy`.
    pub wait_if_busy: bool,
    /// Upper bound on the wait. Only meaningful with `wait_if_busy`.
    pub timeout: Duration,
    /// Fires when the caller goes away (disconnect, shutdown).
    pub cancel: Option<CancellationToken>,
}

impl AdmissionRequest {
    /// Fail immediately with `Busy` when no slot is free.
    #[must_use]
    pub fn fail_fast() -> Self {
        Self::default()
    }

    /// Wait up to `timeout` for a slot.
    #[must_use]
    pub fn wait(timeout: Duration) -> Self {
        Self {
            wait_if_busy: true,
            timeout,
            cancel: None,
        }
    }

    /// Abandon the wait when `token` is cancelled.
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Reject contradictory or out-of-range parameters.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::InvalidRequest`] when a nonzero timeout is
    /// supplied without `wait_if_busy`, or when the timeout exceeds `max_wait`.
    pub fn validate(&self, max_wait: Duration) -> Result<(), AdmissionError> {
        if !self.wait_if_busy && !self.timeout.is_zero() {
            return Err(AdmissionError::InvalidRequest(
                "timeout requires wait_if_busy".into(),
            ));
        }
        if self.timeout > max_wait {
            return Err(AdmissionError::InvalidRequest(format!(
                "timeout {:?} exceeds the maximum wait of {max_wait:?}",
                self.timeout
            )));
        }
        Ok(())
    }
}

/// Configuration values for capacity enforcement.
#[derive(Debug, Clone)]
pub struct AdmissionLimits {
    /// Number of jobs the GPU can run at once.
    pub capacity: u32,
    /// Longest wait a caller may request.
    pub max_wait: Duration,
    /// Maximum number of parked waiters; `None` for unbounded.
    pub max_waiters: Option<usize>,
}

impl AdmissionLimits {
    /// Limits with the given capacity and default wait bounds.
    #[must_use]
    pub const fn with_capacity(capacity: u32) -> Self {
        Self {
            capacity,
            max_wait: DEFAULT_MAX_WAIT,
            max_waiters: None,
        }
    }
}

struct PoolState {
    waiters: WaitQueue,
    outstanding: HashSet<TicketId>,
    next_ticket: u64,
    next_waiter: u64,
}

impl PoolState {
    fn issue_ticket(&mut self) -> TicketId {
        self.next_ticket += 1;
        let id = TicketId::from_raw(self.next_ticket);
        self.outstanding.insert(id);
        id
    }

    fn next_waiter_id(&mut self) -> WaiterId {
        self.next_waiter += 1;
        WaiterId::from_raw(self.next_waiter)
    }
}

struct Shared {
    limits: AdmissionLimits,
    slots: Arc<SlotPool>,
    /// Mirror of the wait queue depth, written under the lock, read lock-free.
    waiting: Arc<AtomicUsize>,
    state: Mutex<PoolState>,
}

/// Grants, queues, and denies requests for GPU slots.
///
/// Cloning is cheap; all clones share the same pool.
#[derive(Clone)]
pub struct AdmissionController {
    shared: Arc<Shared>,
}

impl fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionController")
            .field("capacity", &self.shared.slots.capacity())
            .field("in_use", &self.shared.slots.in_use())
            .field("waiting", &self.shared.waiting.load(Ordering::Acquire))
            .finish()
    }
}

impl AdmissionController {
    /// Create a controller with `capacity` slots and default wait bounds.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError::ZeroCapacity`] when `capacity` is 0.
    pub fn new(capacity: u32) -> Result<Self, UsageError> {
        Self::with_limits(AdmissionLimits::with_capacity(capacity))
    }

    /// Create a controller from explicit limits.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError::ZeroCapacity`] when `limits.capacity` is 0.
    pub fn with_limits(limits: AdmissionLimits) -> Result<Self, UsageError> {
        let slots = Arc::new(SlotPool::new(limits.capacity)?);
        let state = PoolState {
            waiters: WaitQueue::new(limits.max_waiters),
            outstanding: HashSet::new(),
            next_ticket: 0,
            next_waiter: 0,
        };
        info!(
            capacity = limits.capacity,
            max_wait_secs = limits.max_wait.as_secs_f64(),
            max_waiters = ?limits.max_waiters,
            "admission controller initialized"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                limits,
                slots,
                waiting: Arc::new(AtomicUsize::new(0)),
                state: Mutex::new(state),
            }),
        })
    }

    /// Limits this controller enforces.
    #[must_use]
    pub fn limits(&self) -> &AdmissionLimits {
        &self.shared.limits
    }

    /// Acquire a slot according to `request`.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::InvalidRequest`] if the request fails validation
    /// - [`AdmissionError::Busy`] if no slot is free and the caller will not
    ///   wait, or the wait queue is full
    /// - [`AdmissionError::Timeout`] if no slot was handed over within the timeout
    /// - [`AdmissionError::Cancelled`] if the cancellation token fired first
    pub async fn acquire(
        &self,
        request: &AdmissionRequest,
    ) -> Result<AdmissionTicket, AdmissionError> {
        request.validate(self.shared.limits.max_wait)?;

        let (waiter_id, rx) = {
            let mut state = self.shared.state.lock();

            if state.waiters.is_empty() && self.shared.slots.try_acquire() {
                let ticket = state.issue_ticket();
                drop(state);
                debug!(
                    ticket = %ticket,
                    in_use = self.shared.slots.in_use(),
                    "slot granted on fast path"
                );
                return Ok(self.ticket(ticket, Duration::ZERO));
            }

            if !request.wait_if_busy {
                debug!(
                    in_use = self.shared.slots.in_use(),
                    waiting = state.waiters.len(),
                    "admission denied: busy"
                );
                return Err(AdmissionError::Busy);
            }

            let id = state.next_waiter_id();
            let (tx, rx) = oneshot::channel();
            let waiter = Waiter {
                id,
                grant: tx,
                enqueued_at: Instant::now(),
            };
            if state.waiters.enqueue(waiter).is_err() {
                warn!(
                    max_waiters = ?state.waiters.max_depth(),
                    "admission denied: wait queue full"
                );
                return Err(AdmissionError::Busy);
            }
            self.publish_waiting(&state);
            debug!(waiter = %id, position = state.waiters.len(), "waiter parked");
            (id, rx)
        };

        let mut pending = PendingAdmission {
            controller: self.clone(),
            id: waiter_id,
            rx,
            started: Instant::now(),
            settled: false,
        };
        pending.wait(request).await
    }

    /// Return a ticket's slot, handing it to the longest waiter if any.
    ///
    /// # Errors
    ///
    /// - [`UsageError::ForeignTicket`] if another controller issued the ticket
    /// - [`UsageError::DoubleRelease`] if the ticket was already released
    /// - [`UsageError::UnknownTicket`] if the ticket is not outstanding here
    /// - [`UsageError::PoolUnderflow`] if the slot counter is already at zero
    pub fn release(&self, ticket: &AdmissionTicket) -> Result<(), UsageError> {
        if !self.owns(ticket) {
            error!(ticket = %ticket.id, "release of a ticket from another controller");
            return Err(UsageError::ForeignTicket(ticket.id));
        }
        if ticket.released.swap(true, Ordering::AcqRel) {
            error!(ticket = %ticket.id, "ticket released twice");
            return Err(UsageError::DoubleRelease(ticket.id));
        }

        let mut state = self.shared.state.lock();
        if !state.outstanding.remove(&ticket.id) {
            error!(ticket = %ticket.id, "release of a ticket that is not outstanding");
            return Err(UsageError::UnknownTicket(ticket.id));
        }
        let result = self.hand_off(&mut state);
        drop(state);

        if let Err(e) = &result {
            error!(ticket = %ticket.id, error = %e, "slot counter corrupted on release");
        } else {
            debug!(
                ticket = %ticket.id,
                held_for = ?ticket.held_for(),
                "ticket released"
            );
        }
        result
    }

    /// Whether this controller issued `ticket`.
    #[must_use]
    pub fn owns(&self, ticket: &AdmissionTicket) -> bool {
        Arc::ptr_eq(&self.shared, &ticket.controller.shared)
    }

    pub(crate) fn slots(&self) -> Arc<SlotPool> {
        Arc::clone(&self.shared.slots)
    }

    pub(crate) fn waiting_gauge(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.shared.waiting)
    }

    /// Give a freed slot to the head waiter, or back to the pool if nobody waits.
    fn hand_off(&self, state: &mut PoolState) -> Result<(), UsageError> {
        while let Some(waiter) = state.waiters.dequeue() {
            let waiter_id = waiter.id;
            let waited = waiter.enqueued_at.elapsed();
            let ticket = state.issue_ticket();
            if waiter.grant.send(Grant { ticket }).is_ok() {
                self.publish_waiting(state);
                info!(
                    ticket = %ticket,
                    waiter = %waiter_id,
                    waited = ?waited,
                    "slot handed to waiter"
                );
                return Ok(());
            }
            // Receiver already gone; try the next waiter.
            state.outstanding.remove(&ticket);
        }
        self.publish_waiting(state);
        self.shared.slots.release()
    }

    fn publish_waiting(&self, state: &PoolState) {
        self.shared
            .waiting
            .store(state.waiters.len(), Ordering::Release);
    }

    fn ticket(&self, id: TicketId, waited: Duration) -> AdmissionTicket {
        AdmissionTicket {
            id,
            waited,
            granted_at: Instant::now(),
            released: AtomicBool::new(false),
            controller: self.clone(),
        }
    }
}

/// A caller parked in the wait queue.
///
/// Dropping it before it settles (e.g. the request future is dropped on
/// client disconnect) removes the waiter, or passes on a grant that raced the drop.
struct PendingAdmission {
    controller: AdmissionController,
    id: WaiterId,
    rx: oneshot::Receiver<Grant>,
    started: Instant,
    settled: bool,
}

enum WaitOutcome {
    Granted(Grant),
    TimedOut,
    Cancelled,
    Orphaned,
}

impl PendingAdmission {
    async fn wait(
        &mut self,
        request: &AdmissionRequest,
    ) -> Result<AdmissionTicket, AdmissionError> {
        let outcome = if request.timeout.is_zero() {
            // Joined the queue but may not actually wait.
            WaitOutcome::TimedOut
        } else {
            let cancel = request.cancel.clone();
            let cancelled = async move {
                match cancel {
                    Some(token) => token.cancelled_owned().await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                grant = &mut self.rx => match grant {
                    Ok(grant) => WaitOutcome::Granted(grant),
                    Err(_) => WaitOutcome::Orphaned,
                },
                () = tokio::time::sleep(request.timeout) => WaitOutcome::TimedOut,
                () = cancelled => WaitOutcome::Cancelled,
            }
        };

        match outcome {
            WaitOutcome::Granted(grant) => {
                self.settled = true;
                Ok(self.controller.ticket(grant.ticket, self.started.elapsed()))
            }
            WaitOutcome::TimedOut => self.settle(AdmissionError::Timeout {
                waited: self.started.elapsed(),
            }),
            WaitOutcome::Cancelled => self.settle(AdmissionError::Cancelled),
            WaitOutcome::Orphaned => {
                error!(waiter = %self.id, "grant channel closed without a grant");
                self.settle(AdmissionError::Cancelled)
            }
        }
    }

    /// Leave the queue with `failure`, unless a grant already arrived.
    fn settle(&mut self, failure: AdmissionError) -> Result<AdmissionTicket, AdmissionError> {
        self.settled = true;
        let mut state = self.controller.shared.state.lock();
        if state.waiters.remove(self.id) {
            self.controller.publish_waiting(&state);
            drop(state);
            match &failure {
                AdmissionError::Cancelled => {
                    debug!(waiter = %self.id, "admission wait cancelled");
                }
                other => {
                    info!(waiter = %self.id, outcome = %other, "admission wait gave up");
                }
            }
            return Err(failure);
        }
        drop(state);

        // Dequeued under the lock, so the grant was sent before we looked.
        match self.rx.try_recv() {
            Ok(grant) => {
                debug!(waiter = %self.id, ticket = %grant.ticket, "grant won the race");
                Ok(self.controller.ticket(grant.ticket, self.started.elapsed()))
            }
            Err(_) => Err(failure),
        }
    }
}

impl Drop for PendingAdmission {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.controller.shared.state.lock();
        if state.waiters.remove(self.id) {
            self.controller.publish_waiting(&state);
            debug!(waiter = %self.id, "waiter abandoned before grant");
            return;
        }
        if let Ok(grant) = self.rx.try_recv() {
            state.outstanding.remove(&grant.ticket);
            debug!(waiter = %self.id, ticket = %grant.ticket, "passing on grant of abandoned waiter");
            if let Err(e) = self.controller.hand_off(&mut state) {
                error!(error = %e, "slot counter corrupted while passing on a grant");
            }
        }
    }
}

/// Proof of holding one slot. Released exactly once.
///
/// Dropping an unreleased ticket releases it, so a slot is returned on every
/// exit path including panics and cancelled futures.
pub struct AdmissionTicket {
    id: TicketId,
    waited: Duration,
    granted_at: Instant,
    released: AtomicBool,
    controller: AdmissionController,
}

impl AdmissionTicket {
    /// Ticket identifier.
    #[must_use]
    pub const fn id(&self) -> TicketId {
        self.id
    }

    /// Time spent parked before the grant. Zero on the fast path.
    #[must_use]
    pub const fn waited(&self) -> Duration {
        self.waited
    }

    /// Time since the grant.
    #[must_use]
    pub fn held_for(&self) -> Duration {
        self.granted_at.elapsed()
    }

    /// Whether the slot has been returned.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Return the slot to the issuing controller.
    ///
    /// # Errors
    ///
    /// See [`AdmissionController::release`].
    pub fn release(self) -> Result<(), UsageError> {
        self.controller.release(&self)
    }
}

impl fmt::Debug for AdmissionTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionTicket")
            .field("id", &self.id)
            .field("waited", &self.waited)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

impl Drop for AdmissionTicket {
    fn drop(&mut self) {
        if self.is_released() {
            return;
        }
        let this: &Self = self;
        match this.controller.release(this) {
            Ok(()) => debug!(ticket = %this.id, "ticket released on drop"),
            Err(e) => error!(ticket = %this.id, error = %e, "failed to release ticket on drop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonzero_timeout_without_wait_is_invalid() {
        let request = AdmissionRequest {
            wait_if_busy: false,
            timeout: Duration::from_secs(1),
            cancel: None,
        };
        assert!(matches!(
            request.validate(DEFAULT_MAX_WAIT),
            Err(AdmissionError::InvalidRequest(_))
        ));
    }

    #[test]
    fn timeout_above_max_wait_is_invalid() {
        let request = AdmissionRequest::wait(Duration::from_secs(601));
        assert!(request.validate(DEFAULT_MAX_WAIT).is_err());
        assert!(AdmissionRequest::wait(Duration::from_secs(600))
            .validate(DEFAULT_MAX_WAIT)
            .is_ok());
    }

    #[tokio::test]
    async fn fast_path_grants_without_waiting() {
        let controller = AdmissionController::new(1).unwrap();
        let ticket = controller.acquire(&AdmissionRequest::fail_fast()).await.unwrap();

        assert_eq!(ticket.waited(), Duration::ZERO);
        assert_eq!(controller.slots().in_use(), 1);
        ticket.release().unwrap();
        assert_eq!(controller.slots().in_use(), 0);
    }

    #[tokio::test]
    async fn dropped_ticket_returns_its_slot() {
        let controller = AdmissionController::new(1).unwrap();
        {
            let _ticket = controller.acquire(&AdmissionRequest::fail_fast()).await.unwrap();
            assert_eq!(controller.slots().in_use(), 1);
        }
        assert_eq!(controller.slots().in_use(), 0);
    }

    #[tokio::test]
    async fn foreign_ticket_is_rejected() {
        let a = AdmissionController::new(1).unwrap();
        let b = AdmissionController::new(1).unwrap();
        let ticket = a.acquire(&AdmissionRequest::fail_fast()).await.unwrap();

        assert_eq!(b.release(&ticket), Err(UsageError::ForeignTicket(ticket.id())));
        assert!(!ticket.is_released());
        assert_eq!(a.slots().in_use(), 1);
    }

    #[tokio::test]
    async fn bounded_queue_turns_overflow_into_busy() {
        let controller = AdmissionController::with_limits(AdmissionLimits {
            capacity: 1,
            max_wait: DEFAULT_MAX_WAIT,
            max_waiters: Some(1),
        })
        .unwrap();
        let _held = controller.acquire(&AdmissionRequest::fail_fast()).await.unwrap();

        let parked = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .acquire(&AdmissionRequest::wait(Duration::from_secs(5)))
                    .await
            })
        };
        while controller.waiting_gauge().load(Ordering::Acquire) == 0 {
            tokio::task::yield_now().await;
        }

        let overflow = controller
            .acquire(&AdmissionRequest::wait(Duration::from_secs(5)))
            .await;
        assert_eq!(overflow.unwrap_err(), AdmissionError::Busy);

        parked.abort();
    }
}
