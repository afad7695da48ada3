//! Packed atomic status word for a task group.
//!
//! Everything the group needs to coordinate N completing children with its
//! single consumer fits in one 64-bit word:
//!
//! ```text
//! bit 63       cancelled  (sticky; never cleared once set)
//! bit 62       waiting    (a consumer is installed in the wait slot)
//! bits 61..31  ready      (completed results not yet consumed)
//! bits 30..0   pending    (children added and not yet consumed)
//! ```
//!
//! Counter transitions are single atomic RMW operations. The two
//! "complete one result" transitions are compare-and-swap so a polling
//! consumer and an offering child serialize on the word itself: the
//! offerer publishes with an acquire `add_ready`, and the consumer's
//! failed CAS reloads with acquire to observe it.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// An immutable snapshot of the group status word.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct GroupStatus(u64);

impl GroupStatus {
    /// Sticky cancellation bit.
    const CANCELLED: u64 = 1 << 63;
    /// Set while a consumer is parked in the wait slot.
    const WAITING: u64 = 1 << 62;
    /// One ready result (31-bit counter at bits 61..31).
    const ONE_READY: u64 = 1 << 31;
    const READY_MASK: u64 = ((1 << 31) - 1) << 31;
    /// One pending child (31-bit counter at bits 30..0).
    const ONE_PENDING: u64 = 1;
    const PENDING_MASK: u64 = (1 << 31) - 1;

    /// The initial status: not cancelled, no waiter, no ready, no pending.
    #[must_use]
    pub const fn initial() -> Self {
        Self(0)
    }

    /// Returns true if the group has been cancelled.
    #[must_use]
    pub const fn is_cancelled(self) -> bool {
        self.0 & Self::CANCELLED != 0
    }

    /// Returns true if a consumer is parked awaiting a result.
    #[must_use]
    pub const fn has_waiter(self) -> bool {
        self.0 & Self::WAITING != 0
    }

    /// Number of completed results sitting in the ready queue.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn ready_count(self) -> u32 {
        ((self.0 & Self::READY_MASK) >> 31) as u32
    }

    /// Number of children added but not yet consumed.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn pending_count(self) -> u32 {
        (self.0 & Self::PENDING_MASK) as u32
    }

    /// Returns true if no children are pending.
    ///
    /// An empty group must not park its consumer: nothing would ever wake
    /// it.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.pending_count() == 0
    }

    /// Status after completing the parked consumer with one ready result.
    ///
    /// Only valid when the waiting bit is set and both counters are
    /// non-zero.
    fn completing_pending_ready_waiting(self) -> Self {
        debug_assert!(self.has_waiter(), "no waiting consumer to complete");
        debug_assert!(self.ready_count() > 0, "no ready result to complete");
        debug_assert!(self.pending_count() > 0, "no pending child to complete");
        Self(self.0 - Self::WAITING - Self::ONE_READY - Self::ONE_PENDING)
    }

    /// Status after consuming one ready result without a parked consumer.
    fn completing_pending_ready(self) -> Self {
        debug_assert!(self.ready_count() > 0, "no ready result to complete");
        debug_assert!(self.pending_count() > 0, "no pending child to complete");
        Self(self.0 - Self::ONE_READY - Self::ONE_PENDING)
    }
}

impl fmt::Debug for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GroupStatus {{ C:{} W:{} R:{} P:{} }}",
            if self.is_cancelled() { 'y' } else { 'n' },
            if self.has_waiter() { 'y' } else { 'n' },
            self.ready_count(),
            self.pending_count(),
        )
    }
}

/// The atomic status word shared by the consumer and all children.
#[derive(Debug)]
pub struct StatusWord {
    inner: AtomicU64,
}

impl StatusWord {
    /// Creates a status word in the initial state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: AtomicU64::new(0),
        }
    }

    /// Loads the current status with relaxed ordering.
    #[must_use]
    pub fn load_relaxed(&self) -> GroupStatus {
        GroupStatus(self.inner.load(Ordering::Relaxed))
    }

    /// Adds one pending child and returns the assumed new status.
    ///
    /// If the post-state observes cancellation the add is immediately
    /// reversed and the reverted status returned; the caller uses the
    /// cancelled flag to refuse the spawn.
    pub fn add_pending_relaxed(&self) -> GroupStatus {
        let old = self
            .inner
            .fetch_add(GroupStatus::ONE_PENDING, Ordering::Relaxed);
        let status = GroupStatus(old + GroupStatus::ONE_PENDING);
        if status.is_cancelled() {
            let old = self
                .inner
                .fetch_sub(GroupStatus::ONE_PENDING, Ordering::Relaxed);
            return GroupStatus(old - GroupStatus::ONE_PENDING);
        }
        status
    }

    /// Adds one ready result and returns the assumed new status.
    ///
    /// Acquire ordering pairs with the consumer's polling CAS so the
    /// dequeued child's completion state is visible.
    pub fn add_ready_acquire(&self) -> GroupStatus {
        let old = self
            .inner
            .fetch_add(GroupStatus::ONE_READY, Ordering::Acquire);
        let status = GroupStatus(old + GroupStatus::ONE_READY);
        debug_assert!(
            status.ready_count() <= status.pending_count(),
            "ready overtook pending: {status:?}"
        );
        status
    }

    /// Sets the waiting bit and returns the assumed new status.
    ///
    /// The caller must guarantee no other consumer is currently parked.
    pub fn mark_waiting_acquire(&self) -> GroupStatus {
        let old = self.inner.fetch_or(GroupStatus::WAITING, Ordering::Acquire);
        debug_assert!(
            old & GroupStatus::WAITING == 0,
            "concurrent consumers polled the group"
        );
        GroupStatus(old | GroupStatus::WAITING)
    }

    /// Clears the waiting bit, returning the pre-transition status.
    pub fn remove_waiting_release(&self) -> GroupStatus {
        GroupStatus(self.inner.fetch_and(!GroupStatus::WAITING, Ordering::Release))
    }

    /// Sets the sticky cancelled bit, returning the pre-transition status.
    ///
    /// The first caller that observes the bit unset performs the actual
    /// cancellation work; later callers see it set and do nothing.
    pub fn cancel_relaxed(&self) -> GroupStatus {
        GroupStatus(self.inner.fetch_or(GroupStatus::CANCELLED, Ordering::Relaxed))
    }

    /// CAS from `assumed` to `assumed - waiting - one_ready - one_pending`.
    ///
    /// On failure `assumed` is reloaded in place (acquire) and false is
    /// returned; the weak exchange may also fail spuriously, so callers
    /// loop.
    pub fn complete_pending_ready_waiting(&self, assumed: &mut GroupStatus) -> bool {
        let next = assumed.completing_pending_ready_waiting();
        match self.inner.compare_exchange_weak(
            assumed.0,
            next.0,
            Ordering::Relaxed,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(current) => {
                assumed.0 = current;
                false
            }
        }
    }

    /// CAS from `assumed` to `assumed - one_ready - one_pending`.
    ///
    /// Same contract as [`Self::complete_pending_ready_waiting`] minus the
    /// waiting bit; used by the non-suspending poll.
    pub fn complete_pending_ready(&self, assumed: &mut GroupStatus) -> bool {
        let next = assumed.completing_pending_ready();
        match self.inner.compare_exchange_weak(
            assumed.0,
            next.0,
            Ordering::Relaxed,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(current) => {
                assumed.0 = current;
                false
            }
        }
    }
}

impl Default for StatusWord {
    fn default() -> Self {
        Self::new()
    }
}
