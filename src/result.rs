//! Poll results and marshalling into the consumer's result context.
//!
//! `poll` reports one of four conditions; the marshalling step converts
//! the two terminal ones into the consumer-facing shape by moving the
//! payload out of the completed child's fragment and releasing the
//! retained handle.

use crate::child::ChildRef;

/// The result of polling a group for the next completed child.
#[derive(Debug)]
pub(crate) enum PollResult<T, E> {
    /// The consumer was parked in the wait slot; a completing child will
    /// resume it.
    MustWait,
    /// No pending children remain; `next()` yields nothing.
    Empty,
    /// A child completed with a success value. The handle carries the
    /// enqueue-time retain, released when the payload is marshalled.
    Success(ChildRef<T, E>),
    /// A child completed with an error payload.
    Error(ChildRef<T, E>),
}

/// Moves a completed child's payload into the consumer-facing result.
///
/// `None` encodes Empty. Dropping the `ChildRef` here releases the
/// retain the group took when the result was enqueued or handed off.
///
/// # Panics
///
/// Panics on `MustWait` or on a child whose fragment holds no payload;
/// both indicate a broken runtime contract, not a recoverable condition.
pub(crate) fn fill_next_result<T, E>(polled: PollResult<T, E>) -> Option<Result<T, E>> {
    match polled {
        PollResult::MustWait => unreachable!("marshalling a waiting poll result"),
        PollResult::Empty => None,
        PollResult::Success(child) => {
            let payload = child
                .fragment()
                .take()
                .unwrap_or_else(|| unreachable!("ready child {} had no payload", child.id()));
            debug_assert!(payload.is_ok(), "success entry carried an error payload");
            Some(payload)
        }
        PollResult::Error(child) => {
            let payload = child
                .fragment()
                .take()
                .unwrap_or_else(|| unreachable!("ready child {} had no payload", child.id()));
            debug_assert!(payload.is_err(), "error entry carried a success payload");
            Some(payload)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::child::ChildTask;
    use crate::types::TaskId;
    use std::sync::Arc;

    #[test]
    fn empty_marshals_to_none() {
        let result: Option<Result<u32, &str>> = fill_next_result(PollResult::Empty);
        assert_eq!(result, None);
    }

    #[test]
    fn success_moves_payload_and_releases_child() {
        let child = ChildTask::new(TaskId::next());
        child.complete(Ok(42u32));
        let observer: ChildRef<u32, &str> = Arc::clone(&child);
        assert_eq!(Arc::strong_count(&observer), 2);

        let result = fill_next_result(PollResult::Success(child));
        assert_eq!(result, Some(Ok(42)));
        // The retained handle was dropped by marshalling.
        assert_eq!(Arc::strong_count(&observer), 1);
        // The payload is gone from the fragment.
        assert!(!observer.fragment().is_ready());
    }

    #[test]
    fn error_moves_payload() {
        let child: ChildRef<u32, &str> = ChildTask::new(TaskId::next());
        child.complete(Err("boom"));
        let result = fill_next_result(PollResult::Error(child));
        assert_eq!(result, Some(Err("boom")));
    }
}
