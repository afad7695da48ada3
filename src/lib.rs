//! Taskgroup: a structured-concurrency task group.
//!
//! # Overview
//!
//! A task group owns a dynamically growing collection of child
//! asynchronous tasks and exposes a single consumption endpoint,
//! [`TaskGroup::next`], that yields their results in completion order.
//! The parent creates a group, spawns children into it, awaits results
//! one at a time, and on exit every child has been consumed, cancelled,
//! or drained.
//!
//! The group is the rendezvous point between N producer executions on
//! arbitrary threads and one consumer, built from three pieces:
//!
//! - a lock-free packed 64-bit [status word](status::StatusWord) holding
//!   the cancelled/waiting flags and the ready/pending counters,
//! - a FIFO ready queue of completed-but-unconsumed results, and
//! - a single-slot wait queue for the (at most one) parked consumer.
//!
//! # Core guarantees
//!
//! - **Completion order**: results arrive in the order children finish,
//!   not the order they were spawned.
//! - **No lost results**: every offered result is observed by `next()`
//!   or released when the group is destroyed.
//! - **Cancellation is cooperative and idempotent**: `cancel_all` flips
//!   a sticky bit once, propagates a reason to every attached child, and
//!   refuses subsequent spawns; in-flight children may still report in.
//! - **Single consumer**: at most one `next()` may be in flight at a
//!   time.
//!
//! # Example
//!
//! ```
//! use taskgroup::{ParentTask, TaskGroup};
//!
//! let parent = ParentTask::new();
//! let group: TaskGroup<u32, String> = TaskGroup::create(&parent);
//!
//! let child = group.spawn_child().expect("fresh group accepts spawns");
//! child.complete(Ok(7));
//! group.offer(child).expect("offer completed child");
//!
//! assert_eq!(group.try_next(), Some(Some(Ok(7))));
//! assert_eq!(group.try_next(), Some(None));
//! group.destroy(&parent);
//! ```
//!
//! # Module structure
//!
//! - [`group`]: the task group itself and the `next()` future
//! - [`status`]: the packed atomic status word
//! - [`child`]: child task records and their result fragments
//! - [`record`]: status records and cancellation traversal
//! - [`types`]: identifiers and cancellation descriptions
//! - [`error`]: error types
//! - [`runtime`]: a minimal current-thread executor for driving
//!   consumers
//! - [`tracing_compat`]: feature-gated structured logging

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]

pub mod child;
pub mod error;
pub mod group;
mod queue;
pub mod record;
mod result;
pub mod runtime;
pub mod status;
#[cfg(test)]
pub mod test_utils;
pub mod tracing_compat;
pub mod types;
mod wait;

// Re-exports for convenient access to core types
pub use child::{ChildRef, ChildTask, FutureFragment};
pub use error::{Error, ErrorKind, Result};
pub use group::{with_group, Next, TaskGroup};
pub use record::{GroupChildren, ParentTask, StatusRecord};
pub use runtime::{block_on, CurrentThread};
pub use status::{GroupStatus, StatusWord};
pub use types::{CancelKind, CancelReason, GroupId, TaskId};
