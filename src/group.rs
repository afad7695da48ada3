//! The task group: rendezvous between N completing children and one
//! consumer.
//!
//! A parent task creates a group, spawns children into it, and awaits
//! [`TaskGroup::next`] to receive their results in completion order. On
//! the way out every child has either been consumed, cancelled, or
//! drained by [`TaskGroup::destroy`].
//!
//! The coordination core is three pieces composed here:
//!
//! - the packed atomic [`StatusWord`](crate::status::StatusWord) carrying
//!   the cancelled/waiting flags and the ready/pending counters,
//! - the FIFO ready queue of completed-but-unconsumed results, whose
//!   mutex doubles as the group's internal lock, and
//! - the single-slot wait queue holding the (at most one) parked
//!   consumer.
//!
//! `offer` and the poll behind `next()` meet in the middle: an offer
//! either hands its result directly to the parked consumer (filling the
//! consumer's result context *before* waking it) or appends to the ready
//! queue; a poll either drains the queue, reports the group empty, or
//! parks the consumer.

use crate::child::{ChildRef, ChildTask};
use crate::error::{Error, ErrorKind};
use crate::queue::{ReadyItem, ReadyKind, ReadyQueue};
use crate::record::{GroupChildren, ParentTask, StatusRecord};
use crate::result::{fill_next_result, PollResult};
use crate::status::{GroupStatus, StatusWord};
use crate::tracing_compat::{debug, error, trace};
use crate::types::{CancelReason, GroupId, TaskId};
use crate::wait::{WaitSlot, Waiter};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

/// A structured-concurrency task group.
///
/// Generic over the children's success payload `T` and error payload `E`.
/// The group is exclusively owned by its parent task; children interact
/// with it only through [`TaskGroup::offer`].
#[derive(Debug)]
pub struct TaskGroup<T, E> {
    id: GroupId,
    status: StatusWord,
    ready: ReadyQueue<T, E>,
    waiter: WaitSlot<T, E>,
    record: Arc<GroupChildren<T, E>>,
    destroyed: AtomicBool,
}

impl<T: Send + 'static, E: Send + 'static> TaskGroup<T, E> {
    /// Creates a group and registers its status record with `parent`.
    #[must_use]
    pub fn create(parent: &ParentTask) -> Self {
        let record = Arc::new(GroupChildren::new());
        parent.add_status_record(record.clone());
        let group = Self {
            id: GroupId::next(),
            status: StatusWord::new(),
            ready: ReadyQueue::new(),
            waiter: WaitSlot::new(),
            record,
            destroyed: AtomicBool::new(false),
        };
        debug!(group_id = %group.id, parent_id = %parent.id(), "task group created");
        group
    }

    /// Destroys the group: unregisters its status record from `parent`
    /// and drains any unconsumed ready results, releasing the retained
    /// children.
    ///
    /// The parent must have consumed or abandoned all pending results
    /// before destroying; [`with_group`] enforces that discipline by
    /// draining `next()` to `None` first.
    pub fn destroy(&self, parent: &ParentTask) {
        let record: Arc<dyn StatusRecord> = self.record.clone();
        parent.remove_status_record(&record);
        let _drained = self.drain();
        self.record.clear();
        self.destroyed.store(true, Ordering::Release);
        debug!(group_id = %self.id, drained = _drained, "task group destroyed");
    }
}

impl<T, E> TaskGroup<T, E> {
    /// Returns this group's id.
    #[must_use]
    pub const fn id(&self) -> GroupId {
        self.id
    }

    /// Returns a relaxed snapshot of the status word.
    #[must_use]
    pub fn status_relaxed(&self) -> GroupStatus {
        self.status.load_relaxed()
    }

    /// Returns true if no children are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.status.load_relaxed().is_empty()
    }

    /// Returns true if the group has been cancelled.
    ///
    /// Sticky: once true, stays true.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.status.load_relaxed().is_cancelled()
    }

    /// Announces intent to spawn one child.
    ///
    /// Returns `true` if the spawn may proceed, `false` if the group is
    /// cancelled and the spawn must be aborted (the counter bump is
    /// reverted in that case).
    pub fn add_pending(&self) -> bool {
        let status = self.status.add_pending_relaxed();
        if status.is_cancelled() {
            trace!(group_id = %self.id, "spawn refused, group cancelled");
            return false;
        }
        trace!(group_id = %self.id, pending = status.pending_count(), "pending child added");
        true
    }

    /// Attaches a spawned child to the group's status record so the
    /// cancellation traversal can reach it.
    ///
    /// The caller must have obtained a successful [`Self::add_pending`]
    /// for this child.
    pub fn attach_child(&self, child: &ChildRef<T, E>) {
        self.record.attach(Arc::clone(child));
    }

    /// Reserves a pending slot and registers a fresh child task.
    ///
    /// Returns `None` if the group has been cancelled.
    #[must_use]
    pub fn spawn_child(&self) -> Option<ChildRef<T, E>> {
        if !self.add_pending() {
            return None;
        }
        let child = ChildTask::new(TaskId::next());
        self.attach_child(&child);
        Some(child)
    }

    /// Offers a completed child's result into the group.
    ///
    /// If a consumer is parked on `next()`, its result context is filled
    /// and it is resumed directly; otherwise the result is appended to
    /// the ready queue for a later poll. Exactly one of the two happens
    /// per offer. Never suspends.
    ///
    /// The owned `child` handle is the retain that keeps the task alive
    /// across the handoff window; it is transferred to the consumer's
    /// result or into the queue entry.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::GroupDestroyed`] if the group was already
    ///   destroyed; the child reference is dropped and the result
    ///   discarded.
    /// - [`ErrorKind::ChildIncomplete`] if the child has not stored a
    ///   payload via [`ChildTask::complete`] (or it was already
    ///   consumed).
    pub fn offer(&self, child: ChildRef<T, E>) -> Result<(), Error> {
        if self.destroyed.load(Ordering::Acquire) {
            trace!(group_id = %self.id, child_id = %child.id(), "offer after destroy dropped");
            return Err(Error::new(ErrorKind::GroupDestroyed));
        }
        let Some(had_error) = child.fragment().had_error() else {
            return Err(Error::new(ErrorKind::ChildIncomplete));
        };
        let kind = if had_error {
            ReadyKind::Error
        } else {
            ReadyKind::Success
        };

        let mut queue = self.ready.lock();
        let mut assumed = self.status.add_ready_acquire();
        debug_assert!(
            assumed.pending_count() > 0,
            "offered to group with no pending children"
        );

        if assumed.has_waiter() {
            // A consumer is parked: claim it and complete it right away.
            // While we hold the group lock the waiting bit cannot move,
            // so the status CAS only ever loses to counter traffic from
            // add_pending or cancel and is retried.
            if let Some(waiter) = self.waiter.claim() {
                while !self.status.complete_pending_ready_waiting(&mut assumed) {}
                drop(queue);
                self.record.detach(child.id());
                trace!(
                    group_id = %self.id,
                    child_id = %child.id(),
                    had_error,
                    "direct handoff to parked consumer"
                );
                let polled = match kind {
                    ReadyKind::Success => PollResult::Success(child),
                    ReadyKind::Error => PollResult::Error(child),
                };
                // Fill the result context first, then resume the
                // consumer.
                waiter.deliver(fill_next_result(polled));
                waiter.wake();
                return Ok(());
            }
            debug_assert!(false, "waiting bit set with empty wait slot");
        }

        // No-one is waiting (yet): park the result in the ready queue for
        // the next poll. Moving the child into the entry is the
        // enqueue-time retain.
        debug_assert!(self.waiter.is_empty());
        trace!(
            group_id = %self.id,
            child_id = %child.id(),
            had_error,
            ready = assumed.ready_count(),
            "result enqueued"
        );
        queue.enqueue(ReadyItem { kind, child });
        drop(queue);
        Ok(())
    }

    /// Non-suspending poll.
    ///
    /// Returns `Some(None)` when no pending children remain,
    /// `Some(Some(result))` when a completed result was ready, and `None`
    /// when children are still in flight but nothing has completed yet.
    /// Never parks the consumer.
    #[must_use]
    pub fn try_next(&self) -> Option<Option<Result<T, E>>> {
        let mut queue = self.ready.lock();
        let mut assumed = self.status.load_relaxed();
        loop {
            if assumed.is_empty() {
                drop(queue);
                return Some(None);
            }
            if assumed.ready_count() == 0 {
                drop(queue);
                return None;
            }
            if self.status.complete_pending_ready(&mut assumed) {
                let Some(item) = queue.dequeue() else {
                    // Same divergence as in the suspending poll: the
                    // counters promised an entry the queue does not
                    // hold. Abort rather than report "still in flight".
                    error!(group_id = %self.id, "ready queue out of sync with status word");
                    unreachable!("ready count nonzero with empty ready queue");
                };
                drop(queue);
                self.record.detach(item.child.id());
                let polled = match item.kind {
                    ReadyKind::Success => PollResult::Success(item.child),
                    ReadyKind::Error => PollResult::Error(item.child),
                };
                return Some(fill_next_result(polled));
            }
        }
    }

    /// Returns a future resolving to the next completed child result.
    ///
    /// Yields `Some(Ok(value))` / `Some(Err(error))` in completion order,
    /// and `None` once no pending children remain. At most one `next()`
    /// may be in flight at a time; polling from several tasks
    /// concurrently is outside the contract.
    ///
    /// Dropping the future while parked deregisters the consumer
    /// cleanly. If a completing child already handed its result off when
    /// the future is dropped, that result is lost with it.
    #[must_use]
    pub fn next(&self) -> Next<'_, T, E> {
        Next {
            group: self,
            state: NextState::Init,
        }
    }

    /// Cancels the group and every child still attached to it.
    ///
    /// Returns `true` the first time, `false` on repeats (idempotent).
    /// Non-blocking: in-flight children observe cancellation
    /// cooperatively and may still offer results afterwards; such offers
    /// complete normally and are consumed or drained as usual.
    pub fn cancel_all(&self) -> bool {
        let old = self.status.cancel_relaxed();
        if old.is_cancelled() {
            return false;
        }
        debug!(
            group_id = %self.id,
            pending = old.pending_count(),
            "group cancelled, propagating to children"
        );
        self.record.cancel_attached(&CancelReason::group_cancelled());
        true
    }

    /// The poll half of the rendezvous. Called with a fresh
    /// parked-consumer candidate; on `MustWait` the candidate has been
    /// installed in the wait slot.
    fn poll_next_inner(&self, waiter: &Arc<Waiter<T, E>>) -> PollResult<T, E> {
        let mut queue = self.ready.lock();
        let mut assumed = self.status.mark_waiting_acquire();

        // 1) Bail out early if no children are pending: nothing was
        //    submitted before this poll, so parking could never be woken.
        if assumed.is_empty() {
            self.status.remove_waiting_release();
            drop(queue);
            trace!(group_id = %self.id, "poll: group empty");
            return PollResult::Empty;
        }

        // 2) A result is already parked in the ready queue.
        while assumed.ready_count() > 0 {
            if self.status.complete_pending_ready_waiting(&mut assumed) {
                let Some(item) = queue.dequeue() else {
                    // The queue guard is the group lock, so a won CAS
                    // with an empty queue means the word and the queue
                    // have diverged: memory corruption or a broken
                    // runtime contract. Returning MustWait here would
                    // strand the consumer (nothing was installed in the
                    // wait slot), so abort in every build.
                    error!(group_id = %self.id, "ready queue out of sync with status word");
                    unreachable!("ready count nonzero with empty ready queue");
                };
                drop(queue);
                self.record.detach(item.child.id());
                trace!(
                    group_id = %self.id,
                    child_id = %item.child.id(),
                    kind = ?item.kind,
                    "poll: dequeued ready result"
                );
                return match item.kind {
                    ReadyKind::Success => PollResult::Success(item.child),
                    ReadyKind::Error => PollResult::Error(item.child),
                };
            }
        }

        // 3) Children in flight, nothing ready: park the consumer. The
        //    matching offer drives its continuation.
        let installed = self.waiter.install(waiter);
        if !installed {
            debug_assert!(false, "a consumer is already parked on next()");
        }
        drop(queue);
        trace!(group_id = %self.id, "poll: consumer parked");
        PollResult::MustWait
    }

    /// Drains the ready queue, dropping each retained child and its
    /// unconsumed result. Returns the number of entries drained.
    fn drain(&self) -> usize {
        let mut queue = self.ready.lock();
        let mut drained = 0;
        while let Some(item) = queue.dequeue() {
            trace!(group_id = %self.id, child_id = %item.child.id(), "draining unconsumed result");
            drop(item);
            drained += 1;
        }
        drained
    }
}

impl<T, E> Drop for TaskGroup<T, E> {
    fn drop(&mut self) {
        // Safety net for groups dropped without an explicit destroy; the
        // queue must not keep children retained past the group.
        if !self.destroyed.load(Ordering::Acquire) {
            self.drain();
            self.record.clear();
        }
    }
}

/// Future returned by [`TaskGroup::next`].
#[derive(Debug)]
pub struct Next<'a, T, E> {
    group: &'a TaskGroup<T, E>,
    state: NextState<T, E>,
}

#[derive(Debug)]
enum NextState<T, E> {
    /// Not yet polled against the group.
    Init,
    /// Parked in the group's wait slot.
    Parked(Arc<Waiter<T, E>>),
    /// Result delivered.
    Done,
}

impl<T, E> Future for Next<'_, T, E> {
    type Output = Option<Result<T, E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match &this.state {
            NextState::Init => {
                let waiter = Waiter::new(cx.waker().clone());
                match this.group.poll_next_inner(&waiter) {
                    PollResult::MustWait => {
                        this.state = NextState::Parked(waiter);
                        Poll::Pending
                    }
                    polled => {
                        this.state = NextState::Done;
                        Poll::Ready(fill_next_result(polled))
                    }
                }
            }
            NextState::Parked(waiter) => {
                let waiter = Arc::clone(waiter);
                if let Some(result) = waiter.take_delivery() {
                    this.state = NextState::Done;
                    return Poll::Ready(result);
                }
                // Spurious or racing wake: stay parked with a fresh
                // waker.
                waiter.update_waker(cx.waker());
                Poll::Pending
            }
            NextState::Done => panic!("`Next` polled after completion"),
        }
    }
}

impl<T, E> Drop for Next<'_, T, E> {
    fn drop(&mut self) {
        if let NextState::Parked(waiter) = &self.state {
            // Deregister under the group lock so no offer can claim a
            // waiter we are about to abandon.
            let queue = self.group.ready.lock();
            if self.group.waiter.claim_if(waiter) {
                self.group.status.remove_waiting_release();
            }
            drop(queue);
            // If an offer already claimed this waiter, its delivered
            // result is dropped together with it.
        }
    }
}

/// Runs `body` inside a group scope.
///
/// Creates the group, runs the body, then awaits every remaining child
/// result before destroying the group — the structured-concurrency
/// guarantee that no child outlives its scope.
pub async fn with_group<T, E, F, Fut, R>(parent: &ParentTask, body: F) -> R
where
    T: Send + 'static,
    E: Send + 'static,
    F: FnOnce(Arc<TaskGroup<T, E>>) -> Fut,
    Fut: Future<Output = R>,
{
    let group = Arc::new(TaskGroup::create(parent));
    let out = body(Arc::clone(&group)).await;
    while group.next().await.is_some() {}
    group.destroy(parent);
    out
}
