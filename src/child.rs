//! Child task record and future fragment.
//!
//! A child is an asynchronous unit of work spawned into a group. The group
//! never owns children persistently; it sees them as shared handles
//! ([`ChildRef`]) whose clone/drop pairs are the retain/release protocol
//! of the original runtime. Each child carries:
//!
//! - a [`FutureFragment`]: one-shot storage for the completion payload
//!   (success value or error), and
//! - a [`CancelCell`]: the cooperative cancellation state the group's
//!   `cancel_all` traversal writes into.

use crate::tracing_compat::trace;
use crate::types::{CancelReason, TaskId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::Waker;

/// Shared handle to a child task.
///
/// Cloning the handle is a retain; dropping it is a release. The group
/// takes exactly one extra handle per ready-queue entry and transfers it
/// to the consumer at dequeue time.
pub type ChildRef<T, E> = Arc<ChildTask<T, E>>;

/// One-shot storage for a child's completion payload.
///
/// The fragment moves `Pending → Ready(result) → Taken` and never goes
/// back. `Ready` holds the payload between the child's completion and the
/// consumer's marshalling step.
#[derive(Debug)]
pub struct FutureFragment<T, E> {
    state: Mutex<FragmentState<T, E>>,
}

#[derive(Debug)]
enum FragmentState<T, E> {
    Pending,
    Ready(Result<T, E>),
    Taken,
}

impl<T, E> FutureFragment<T, E> {
    fn new() -> Self {
        Self {
            state: Mutex::new(FragmentState::Pending),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FragmentState<T, E>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Stores the completion payload.
    ///
    /// Returns `false` if the fragment was already completed; the payload
    /// is dropped in that case.
    pub fn complete(&self, result: Result<T, E>) -> bool {
        let mut state = self.lock();
        match &*state {
            FragmentState::Pending => {
                *state = FragmentState::Ready(result);
                true
            }
            FragmentState::Ready(_) | FragmentState::Taken => false,
        }
    }

    /// Returns whether the stored payload is an error.
    ///
    /// `None` if the fragment is still pending or already consumed.
    #[must_use]
    pub fn had_error(&self) -> Option<bool> {
        match &*self.lock() {
            FragmentState::Ready(result) => Some(result.is_err()),
            FragmentState::Pending | FragmentState::Taken => None,
        }
    }

    /// Returns true if a payload is stored and not yet consumed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(&*self.lock(), FragmentState::Ready(_))
    }

    /// Moves the payload out, leaving the fragment consumed.
    ///
    /// `None` if the fragment is pending or was already taken.
    pub(crate) fn take(&self) -> Option<Result<T, E>> {
        let mut state = self.lock();
        match std::mem::replace(&mut *state, FragmentState::Taken) {
            FragmentState::Ready(result) => Some(result),
            other => {
                // Keep the observed state; only Ready may become Taken.
                *state = other;
                None
            }
        }
    }
}

/// Per-child cooperative cancellation state.
///
/// The group's cancellation traversal writes the request here; the code
/// driving the child polls [`CancelCell::is_requested`] (or parks a waker)
/// and completes the child however it sees fit.
#[derive(Debug, Default)]
pub struct CancelCell {
    requested: AtomicBool,
    reason: Mutex<Option<CancelReason>>,
    waker: Mutex<Option<Waker>>,
}

impl CancelCell {
    fn lock_reason(&self) -> std::sync::MutexGuard<'_, Option<CancelReason>> {
        match self.reason.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Records a cancellation request, strengthening any existing reason.
    ///
    /// Returns `true` if this was the first request. Wakes the cancel
    /// waker, if one is parked.
    pub fn request(&self, reason: &CancelReason) -> bool {
        let first = {
            let mut guard = self.lock_reason();
            match &mut *guard {
                Some(existing) => {
                    existing.strengthen(reason);
                    false
                }
                None => {
                    *guard = Some(reason.clone());
                    true
                }
            }
        };
        self.requested.store(true, Ordering::Release);

        let waker = {
            let mut guard = match self.waker.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        first
    }

    /// Returns true once cancellation has been requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Returns the current cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        self.lock_reason().clone()
    }

    /// Parks a waker to be fired on the next cancellation request.
    pub fn set_waker(&self, waker: &Waker) {
        let mut guard = match self.waker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(waker.clone());
    }
}

/// A child task registered with a group.
#[derive(Debug)]
pub struct ChildTask<T, E> {
    id: TaskId,
    fragment: FutureFragment<T, E>,
    cancel: CancelCell,
}

impl<T, E> ChildTask<T, E> {
    /// Creates a fresh child task handle.
    #[must_use]
    pub fn new(id: TaskId) -> ChildRef<T, E> {
        Arc::new(Self {
            id,
            fragment: FutureFragment::new(),
            cancel: CancelCell::default(),
        })
    }

    /// Returns this child's id.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the result storage area of this child.
    #[must_use]
    pub const fn fragment(&self) -> &FutureFragment<T, E> {
        &self.fragment
    }

    /// Returns the cancellation cell of this child.
    #[must_use]
    pub const fn cancellation(&self) -> &CancelCell {
        &self.cancel
    }

    /// Stores the completion payload into the fragment.
    ///
    /// Returns `false` on double completion. Completing a child does not
    /// notify the group; the completing executor must still call
    /// `offer` on the owning group.
    pub fn complete(&self, result: Result<T, E>) -> bool {
        let stored = self.fragment.complete(result);
        trace!(child_id = %self.id, stored, "child completed");
        stored
    }

    /// Records a cancellation request on this child.
    ///
    /// Returns `true` if this was the first request.
    pub fn request_cancel(&self, reason: &CancelReason) -> bool {
        let first = self.cancel.request(reason);
        trace!(child_id = %self.id, first, kind = %reason.kind(), "child cancel requested");
        first
    }

    /// Returns true once cancellation has been requested for this child.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_requested()
    }
}
