//! Status records: the cancellation glue between parent task and group.
//!
//! The group does not store child tasks for scheduling; it embeds a
//! status record ([`GroupChildren`]) that the parent's cancellation
//! machinery can reach. `cancel_all` traverses the record and requests
//! cancellation on every still-attached child. The parent side is a
//! plain list of records ([`ParentTask`]); a full runtime would hang
//! richer task state off it, the group only needs the record hooks.

use crate::child::ChildRef;
use crate::tracing_compat::{debug, trace};
use crate::types::{CancelReason, TaskId};
use smallvec::SmallVec;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// A record registered with a parent task through which cancellation
/// traverses into a group's children.
pub trait StatusRecord: Send + Sync {
    /// Requests cancellation of every child currently attached.
    fn cancel_children(&self, reason: &CancelReason);
}

/// The child registry embedded in each group.
///
/// This is the canonical owner of the group's child set. Children are
/// attached at spawn time and detached when their result is consumed, so
/// the cancellation traversal only ever reaches children whose results
/// are still outstanding.
pub struct GroupChildren<T, E> {
    children: Mutex<SmallVec<[ChildRef<T, E>; 4]>>,
}

impl<T, E> GroupChildren<T, E> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            children: Mutex::new(SmallVec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SmallVec<[ChildRef<T, E>; 4]>> {
        match self.children.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Attaches a child to the registry.
    pub(crate) fn attach(&self, child: ChildRef<T, E>) {
        let mut children = self.lock();
        debug_assert!(
            !children.iter().any(|c| c.id() == child.id()),
            "child {} attached twice",
            child.id()
        );
        children.push(child);
    }

    /// Detaches the child with the given id.
    ///
    /// Returns `false` if no such child is attached.
    pub(crate) fn detach(&self, id: TaskId) -> bool {
        let mut children = self.lock();
        let before = children.len();
        children.retain(|c| c.id() != id);
        children.len() != before
    }

    /// Drops every attached child reference.
    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    /// Number of currently attached children.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no children are attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Requests cancellation on every attached child.
    ///
    /// The traversal snapshots the list so child wakers run without the
    /// registry lock held.
    pub fn cancel_attached(&self, reason: &CancelReason) {
        let snapshot: SmallVec<[ChildRef<T, E>; 4]> = {
            let children = self.lock();
            children.iter().map(Arc::clone).collect()
        };
        trace!(count = snapshot.len(), kind = %reason.kind(), "cancelling attached children");
        for child in snapshot {
            child.request_cancel(reason);
        }
    }
}

impl<T, E> Default for GroupChildren<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> fmt::Debug for GroupChildren<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupChildren")
            .field("len", &self.len())
            .finish()
    }
}

impl<T: Send, E: Send> StatusRecord for GroupChildren<T, E> {
    fn cancel_children(&self, reason: &CancelReason) {
        self.cancel_attached(reason);
    }
}

/// The parent-task side of the status-record protocol.
///
/// Holds the records of every group created under this task so a
/// parent-level cancellation can reach all of them.
pub struct ParentTask {
    id: TaskId,
    records: Mutex<Vec<Arc<dyn StatusRecord>>>,
}

impl ParentTask {
    /// Creates a parent task record.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: TaskId::next(),
            records: Mutex::new(Vec::new()),
        }
    }

    /// Returns this task's id.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<dyn StatusRecord>>> {
        match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Registers a status record with this task.
    pub fn add_status_record(&self, record: Arc<dyn StatusRecord>) {
        self.lock().push(record);
    }

    /// Unregisters a status record.
    ///
    /// Returns `false` if the record was not registered.
    pub fn remove_status_record(&self, record: &Arc<dyn StatusRecord>) -> bool {
        let mut records = self.lock();
        let before = records.len();
        records.retain(|r| !Arc::ptr_eq(r, record));
        records.len() != before
    }

    /// Number of registered records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.lock().len()
    }

    /// Cancels the children of every registered record.
    pub fn cancel_all(&self, reason: &CancelReason) {
        let snapshot: Vec<Arc<dyn StatusRecord>> = {
            let records = self.lock();
            records.iter().map(Arc::clone).collect()
        };
        debug!(parent_id = %self.id, records = snapshot.len(), kind = %reason.kind(), "parent cancelling all records");
        for record in snapshot {
            record.cancel_children(reason);
        }
    }
}

impl Default for ParentTask {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ParentTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParentTask")
            .field("id", &self.id)
            .field("records", &self.record_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::child::ChildTask;
    use crate::test_utils::init_test_logging;
    use crate::types::CancelKind;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn attach_detach_roundtrip() {
        init_test("attach_detach_roundtrip");
        let registry: GroupChildren<u32, &str> = GroupChildren::new();
        let child = ChildTask::new(TaskId::next());
        let id = child.id();

        registry.attach(child);
        assert_eq!(registry.len(), 1);

        let removed = registry.detach(id);
        crate::assert_with_log!(removed, "detach existing", true, removed);
        assert!(registry.is_empty());

        let missing = registry.detach(id);
        crate::assert_with_log!(!missing, "detach missing", false, missing);
        crate::test_complete!("attach_detach_roundtrip");
    }

    #[test]
    fn cancel_traversal_reaches_only_attached() {
        init_test("cancel_traversal_reaches_only_attached");
        let registry: GroupChildren<u32, &str> = GroupChildren::new();
        let consumed = ChildTask::new(TaskId::next());
        let inflight = ChildTask::new(TaskId::next());

        registry.attach(Arc::clone(&consumed));
        registry.attach(Arc::clone(&inflight));
        registry.detach(consumed.id());

        registry.cancel_attached(&CancelReason::group_cancelled());

        assert!(!consumed.is_cancel_requested());
        assert!(inflight.is_cancel_requested());
        assert_eq!(
            inflight.cancellation().reason().map(|r| r.kind()),
            Some(CancelKind::GroupCancelled)
        );
        crate::test_complete!("cancel_traversal_reaches_only_attached");
    }

    #[test]
    fn parent_add_remove_records() {
        init_test("parent_add_remove_records");
        let parent = ParentTask::new();
        let record: Arc<GroupChildren<u32, &str>> = Arc::new(GroupChildren::new());
        let dyn_record: Arc<dyn StatusRecord> = record;

        parent.add_status_record(Arc::clone(&dyn_record));
        assert_eq!(parent.record_count(), 1);

        let removed = parent.remove_status_record(&dyn_record);
        crate::assert_with_log!(removed, "record removed", true, removed);
        assert_eq!(parent.record_count(), 0);

        let again = parent.remove_status_record(&dyn_record);
        crate::assert_with_log!(!again, "double remove", false, again);
        crate::test_complete!("parent_add_remove_records");
    }

    #[test]
    fn parent_cancel_all_traverses_records() {
        init_test("parent_cancel_all_traverses_records");
        let parent = ParentTask::new();
        let registry: Arc<GroupChildren<u32, &str>> = Arc::new(GroupChildren::new());
        let child = ChildTask::new(TaskId::next());
        registry.attach(Arc::clone(&child));
        parent.add_status_record(registry);

        parent.cancel_all(&CancelReason::parent_cancelled());
        assert!(child.is_cancel_requested());
        assert_eq!(
            child.cancellation().reason().map(|r| r.kind()),
            Some(CancelKind::ParentCancelled)
        );
        crate::test_complete!("parent_cancel_all_traverses_records");
    }
}
