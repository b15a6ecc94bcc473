//! Serial task queue with a terminal poison state.
//!
//! Each captured response owns one queue. Tasks run one at a time in push
//! order; a task that hits a fatal condition calls [`SerialQueue::destroy`],
//! which drops everything still pending and rejects further pushes.

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

/// Observable queue state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// No task in flight
    Idle,
    /// A drain loop is executing tasks
    Running,
    /// Poisoned; pending tasks were dropped and pushes are ignored
    Destroyed,
}

#[derive(Default)]
struct Inner {
    tasks: VecDeque<BoxFuture<'static, ()>>,
    running: bool,
    destroyed: bool,
}

#[derive(Default)]
struct Shared {
    inner: Mutex<Inner>,
    settled: Notify,
}

/// A FIFO of async tasks executed strictly one after another.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone, Default)]
pub struct SerialQueue {
    shared: Arc<Shared>,
}

impl SerialQueue {
    /// Create an idle, empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task. Ignored once the queue is destroyed.
    pub fn push<F>(&self, task: F) -> &Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut inner = self.shared.inner.lock();
        if !inner.destroyed {
            inner.tasks.push_back(task.boxed());
        }
        self
    }

    /// Start draining on the current tokio runtime if idle.
    pub fn run(&self) {
        {
            let mut inner = self.shared.inner.lock();
            if inner.running || inner.destroyed || inner.tasks.is_empty() {
                return;
            }
            inner.running = true;
        }

        let queue = self.clone();
        tokio::spawn(async move { queue.drain().await });
    }

    /// Poison the queue: drop pending tasks and reject future pushes.
    ///
    /// A task already in flight runs to completion.
    pub fn destroy(&self) {
        let (dropped, running) = {
            let mut inner = self.shared.inner.lock();
            inner.destroyed = true;
            (std::mem::take(&mut inner.tasks), inner.running)
        };
        drop(dropped);

        if !running {
            self.shared.settled.notify_waiters();
        }
    }

    /// Current state.
    pub fn state(&self) -> QueueState {
        let inner = self.shared.inner.lock();
        if inner.destroyed {
            QueueState::Destroyed
        } else if inner.running {
            QueueState::Running
        } else {
            QueueState::Idle
        }
    }

    /// Whether the queue has been destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.shared.inner.lock().destroyed
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.shared.inner.lock().tasks.len()
    }

    /// Wait until no task is in flight and nothing is pending.
    ///
    /// Starts the drain loop if tasks were pushed without [`run`](Self::run).
    pub async fn settled(&self) {
        loop {
            let notified = self.shared.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let inner = self.shared.inner.lock();
                if !inner.running && (inner.destroyed || inner.tasks.is_empty()) {
                    return;
                }
            }
            self.run();

            notified.await;
        }
    }

    async fn drain(&self) {
        loop {
            let task = {
                let mut inner = self.shared.inner.lock();
                match inner.tasks.pop_front() {
                    Some(task) if !inner.destroyed => task,
                    _ => {
                        inner.running = false;
                        break;
                    }
                }
            };

            if AssertUnwindSafe(task).catch_unwind().await.is_err() {
                warn!("Queued task panicked, destroying queue");
                self.destroy();
            }
        }

        self.shared.settled.notify_waiters();
    }
}
