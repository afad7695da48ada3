//! Minimal current-thread executor for driving group consumers.
//!
//! The group itself never schedules anything: resuming a parked consumer
//! is a single `Waker::wake`. This module supplies the "default global
//! executor" collaborator for demos and end-to-end tests — a lock-free
//! injection queue of runnable tasks plus a `block_on` loop that drains
//! it between polls of the main future. Producer threads may complete
//! and offer children from anywhere; wakes routed here unpark the
//! driving thread.

use crossbeam_queue::SegQueue;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Wake, Waker};
use std::thread::{self, Thread};

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Lock-free injection point for runnable tasks.
struct GlobalQueue {
    injector: SegQueue<Arc<TaskCell>>,
    /// Thread currently driving `block_on`, if any; woken on injection.
    driver: Mutex<Option<Thread>>,
}

impl GlobalQueue {
    fn new() -> Self {
        Self {
            injector: SegQueue::new(),
            driver: Mutex::new(None),
        }
    }

    fn push(&self, task: Arc<TaskCell>) {
        self.injector.push(task);
        self.unpark_driver();
    }

    fn pop(&self) -> Option<Arc<TaskCell>> {
        self.injector.pop()
    }

    fn set_driver(&self, thread: Option<Thread>) {
        let mut guard = match self.driver.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = thread;
    }

    fn unpark_driver(&self) {
        let driver = {
            let guard = match self.driver.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.clone()
        };
        if let Some(thread) = driver {
            thread.unpark();
        }
    }
}

/// A spawned task: its future plus the queue it reschedules onto.
struct TaskCell {
    future: Mutex<Option<BoxFuture>>,
    queue: Arc<GlobalQueue>,
}

impl Wake for TaskCell {
    fn wake(self: Arc<Self>) {
        let queue = Arc::clone(&self.queue);
        queue.push(self);
    }
}

/// Waker for the main future driven by `block_on`: unparks the driver.
struct ThreadWaker(Thread);

impl Wake for ThreadWaker {
    fn wake(self: Arc<Self>) {
        self.0.unpark();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.unpark();
    }
}

/// A single-threaded executor with a global injection queue.
pub struct CurrentThread {
    queue: Arc<GlobalQueue>,
}

impl CurrentThread {
    /// Creates an executor with an empty run queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Arc::new(GlobalQueue::new()),
        }
    }

    /// Enqueues a future onto the global run queue.
    ///
    /// It runs when [`Self::block_on`] drains the queue.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cell = Arc::new(TaskCell {
            future: Mutex::new(Some(Box::pin(future))),
            queue: Arc::clone(&self.queue),
        });
        self.queue.push(cell);
    }

    /// Drives `main` to completion, draining spawned tasks while it
    /// waits.
    pub fn block_on<F: Future>(&self, main: F) -> F::Output {
        self.queue.set_driver(Some(thread::current()));
        let waker = Waker::from(Arc::new(ThreadWaker(thread::current())));
        let mut cx = Context::from_waker(&waker);
        let mut main = std::pin::pin!(main);

        let output = loop {
            if let Poll::Ready(output) = main.as_mut().poll(&mut cx) {
                break output;
            }
            let ran = self.run_queued();
            if !ran {
                // A wake between the poll above and this park leaves the
                // unpark token set, so the park returns immediately.
                thread::park();
            }
        };
        self.queue.set_driver(None);
        output
    }

    /// Polls every currently queued task once. Returns true if any ran.
    fn run_queued(&self) -> bool {
        let mut ran = false;
        while let Some(task) = self.queue.pop() {
            ran = true;
            let future = {
                let mut slot = match task.future.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                slot.take()
            };
            let Some(mut future) = future else {
                // Woken again after completion; nothing to run.
                continue;
            };
            let waker = Waker::from(Arc::clone(&task));
            let mut cx = Context::from_waker(&waker);
            if future.as_mut().poll(&mut cx).is_pending() {
                let mut slot = match task.future.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                *slot = Some(future);
            }
        }
        ran
    }
}

impl Default for CurrentThread {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives a future to completion on a fresh single-threaded executor.
pub fn block_on<F: Future>(future: F) -> F::Output {
    CurrentThread::new().block_on(future)
}
