//! Single-slot wait queue holding the parked consumer.
//!
//! At most one consumer task awaits `next()` at a time. When nothing is
//! ready it parks here as a [`Waiter`]: a result cell plus its waker. An
//! offering child claims the slot, fills the result cell, and only then
//! fires the waker, so the consumer always resumes with its result
//! context fully established.

use std::sync::{Arc, Mutex, MutexGuard};
use std::task::Waker;

/// A parked consumer awaiting the next group result.
#[derive(Debug)]
pub(crate) struct Waiter<T, E> {
    /// The consumer's result context. `Some(None)` encodes Empty; it is
    /// never produced by direct handoff but keeps the marshalling shape
    /// uniform with `next()`'s output.
    cell: Mutex<Option<Option<Result<T, E>>>>,
    /// Latest waker of the consumer; refreshed on every re-poll.
    waker: Mutex<Waker>,
}

impl<T, E> Waiter<T, E> {
    pub(crate) fn new(waker: Waker) -> Arc<Self> {
        Arc::new(Self {
            cell: Mutex::new(None),
            waker: Mutex::new(waker),
        })
    }

    fn lock_cell(&self) -> MutexGuard<'_, Option<Option<Result<T, E>>>> {
        match self.cell.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_waker(&self) -> MutexGuard<'_, Waker> {
        match self.waker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Fills the result context. Must happen before [`Self::wake`].
    pub(crate) fn deliver(&self, result: Option<Result<T, E>>) {
        let mut cell = self.lock_cell();
        debug_assert!(cell.is_none(), "waiter delivered twice");
        *cell = Some(result);
    }

    /// Takes the delivered result, if any.
    pub(crate) fn take_delivery(&self) -> Option<Option<Result<T, E>>> {
        self.lock_cell().take()
    }

    /// Replaces the stored waker with the consumer's current one.
    pub(crate) fn update_waker(&self, waker: &Waker) {
        let mut guard = self.lock_waker();
        if !guard.will_wake(waker) {
            *guard = waker.clone();
        }
    }

    /// Resumes the consumer ("enqueue on the global executor").
    pub(crate) fn wake(&self) {
        let waker = self.lock_waker().clone();
        waker.wake();
    }
}

/// Atomic nullable reference to the awaiting consumer.
#[derive(Debug)]
pub(crate) struct WaitSlot<T, E> {
    slot: Mutex<Option<Arc<Waiter<T, E>>>>,
}

impl<T, E> WaitSlot<T, E> {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<Waiter<T, E>>>> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Installs the consumer (null → consumer).
    ///
    /// Returns `false` if another consumer is already parked, which the
    /// single-consumer contract forbids.
    pub(crate) fn install(&self, waiter: &Arc<Waiter<T, E>>) -> bool {
        let mut slot = self.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(Arc::clone(waiter));
        true
    }

    /// Claims the parked consumer (current → null).
    pub(crate) fn claim(&self) -> Option<Arc<Waiter<T, E>>> {
        self.lock().take()
    }

    /// Claims the slot only if it holds exactly `waiter`.
    ///
    /// Used when a parked `next()` future is dropped: the consumer must
    /// not yank a slot an offer has already claimed and replaced.
    pub(crate) fn claim_if(&self, waiter: &Arc<Waiter<T, E>>) -> bool {
        let mut slot = self.lock();
        match &*slot {
            Some(current) if Arc::ptr_eq(current, waiter) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// Returns true if no consumer is parked.
    pub(crate) fn is_empty(&self) -> bool {
        self.lock().is_none()
    }
}
