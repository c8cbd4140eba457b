//! Bounded-concurrency priority queue.
//!
//! The `TaskQueue` admits tasks without blocking the caller, runs at most
//! `max_concurrent` of them at once on the tokio runtime, and races each
//! running task against its timeout. Among pending tasks the highest
//! priority starts first; equal priorities start in admission order.
//!
//! All bookkeeping lives behind one mutex that is never held across an
//! await. The dispatch scan runs while holding it, so a completion that
//! fires mid-scan waits for the lock and then performs its own re-check.

use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::{pin, Pin};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{oneshot, Notify};

use crate::dispatch::task::{Task, TaskId};
use crate::{rlog_debug, rlog_warn, Error, Result};

/// Point-in-time view of the queue counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub running: usize,
    pub completed: u64,
    pub failed: u64,
    pub max_concurrent: usize,
}

struct Queued<T> {
    task: Task<T>,
    tx: oneshot::Sender<Result<T>>,
}

struct QueueState<T> {
    /// Insertion ordered; selection picks by priority.
    pending: Vec<Queued<T>>,
    running: HashSet<TaskId>,
    completed: u64,
    failed: u64,
}

struct Shared<T> {
    state: Mutex<QueueState<T>>,
    idle: Notify,
    max_concurrent: usize,
    default_timeout: Duration,
}

/// Handle to a priority queue. Clones share the same queue.
///
/// # Example
///
/// ```ignore
/// use relay::dispatch::{Priority, Task, TaskQueue};
/// use std::time::Duration;
///
/// let queue = TaskQueue::new(2, Duration::from_secs(30))?;
/// let handle = queue.enqueue(Task::new(async { Ok(42) }).with_priority(Priority::URGENT));
/// assert_eq!(handle.await?, 42);
/// ```
pub struct TaskQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for TaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for TaskQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("max_concurrent", &self.shared.max_concurrent)
            .field("default_timeout", &self.shared.default_timeout)
            .finish_non_exhaustive()
    }
}

/// Settles with the task's result, its timeout, or its removal by `clear`.
pub struct TaskHandle<T> {
    id: TaskId,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> &TaskId {
        &self.id
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(Error::TaskJoin("queue dropped the task before it settled".to_string()))
            })
        })
    }
}

impl<T: Send + 'static> TaskQueue<T> {
    /// Create a queue running at most `max_concurrent` tasks at once.
    ///
    /// # Errors
    ///
    /// Returns a validation error when `max_concurrent` is zero.
    pub fn new(max_concurrent: usize, default_timeout: Duration) -> Result<Self> {
        if max_concurrent == 0 {
            return Err(Error::Validation(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    pending: Vec::new(),
                    running: HashSet::new(),
                    completed: 0,
                    failed: 0,
                }),
                idle: Notify::new(),
                max_concurrent,
                default_timeout,
            }),
        })
    }

    /// Admit a task. Never blocks; the task starts right away if there is
    /// headroom. Must be called from within a tokio runtime.
    pub fn enqueue(&self, task: Task<T>) -> TaskHandle<T> {
        let (tx, rx) = oneshot::channel();
        let id = task.id.clone();
        {
            let mut state = self.lock();
            let duplicate =
                state.running.contains(&id) || state.pending.iter().any(|q| q.task.id == id);
            if duplicate {
                rlog_warn!("TaskQueue: rejecting duplicate task {}", id);
                let _ = tx.send(Err(Error::DuplicateTask { id: id.clone() }));
                return TaskHandle { id, rx };
            }
            rlog_debug!(
                "TaskQueue: enqueue {} priority={} pending={}",
                id,
                task.priority.0,
                state.pending.len() + 1
            );
            state.pending.push(Queued { task, tx });
        }
        self.dispatch();
        TaskHandle { id, rx }
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.lock();
        QueueStatus {
            pending: state.pending.len(),
            running: state.running.len(),
            completed: state.completed,
            failed: state.failed,
            max_concurrent: self.shared.max_concurrent,
        }
    }

    /// True when the id is pending or running.
    pub fn contains(&self, id: &TaskId) -> bool {
        let state = self.lock();
        state.running.contains(id) || state.pending.iter().any(|q| &q.task.id == id)
    }

    /// Fail every pending task with `QueueCleared`. Running tasks continue.
    /// Returns the number of tasks discarded.
    pub fn clear(&self) -> usize {
        let discarded: Vec<Queued<T>> = self.lock().pending.drain(..).collect();
        let count = discarded.len();
        for queued in discarded {
            let id = queued.task.id.clone();
            let _ = queued.tx.send(Err(Error::QueueCleared { id }));
        }
        rlog_debug!("TaskQueue: cleared {} pending tasks", count);
        self.notify_if_idle();
        count
    }

    /// Resolve once nothing is pending or running. Tasks admitted while
    /// waiting extend the wait.
    pub async fn drain(&self) {
        loop {
            let mut notified = pin!(self.shared.idle.notified());
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.pending.is_empty() && state.running.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start pending tasks while there is headroom.
    fn dispatch(&self) {
        let mut state = self.lock();
        while state.running.len() < self.shared.max_concurrent {
            let Some(index) = next_index(&state.pending) else {
                break;
            };
            let queued = state.pending.remove(index);
            state.running.insert(queued.task.id.clone());
            self.start(queued, state.running.len());
        }
    }

    fn start(&self, queued: Queued<T>, running: usize) {
        let Queued { task, tx } = queued;
        let Task {
            id,
            priority,
            timeout,
            enqueued_at,
            work,
        } = task;
        let timeout = timeout.unwrap_or(self.shared.default_timeout);
        rlog_debug!(
            "TaskQueue: start {} priority={} waited={}ms running={}/{}",
            id,
            priority.0,
            (chrono::Utc::now() - enqueued_at).num_milliseconds(),
            running,
            self.shared.max_concurrent
        );

        let queue = self.clone();
        tokio::spawn(async move {
            let guarded = AssertUnwindSafe(work).catch_unwind();
            let outcome = match tokio::time::timeout(timeout, guarded).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(Error::TaskJoin(format!("task {id} panicked"))),
                Err(_) => {
                    rlog_warn!("TaskQueue: task {} timed out after {:?}", id, timeout);
                    Err(Error::TaskTimeout {
                        id: id.clone(),
                        timeout,
                    })
                }
            };
            queue.settle(&id, outcome.is_ok());
            let _ = tx.send(outcome);
        });
    }

    fn settle(&self, id: &TaskId, succeeded: bool) {
        {
            let mut state = self.lock();
            state.running.remove(id);
            if succeeded {
                state.completed += 1;
            } else {
                state.failed += 1;
            }
        }
        rlog_debug!("TaskQueue: settled {} ok={}", id, succeeded);
        self.dispatch();
        self.notify_if_idle();
    }

    fn notify_if_idle(&self) {
        if self.is_idle() {
            self.shared.idle.notify_waiters();
        }
    }
}

/// Highest priority first; the earliest admitted wins a tie.
fn next_index<T>(pending: &[Queued<T>]) -> Option<usize> {
    let mut best: Option<(usize, i32)> = None;
    for (index, queued) in pending.iter().enumerate() {
        let priority = queued.task.priority.0;
        if best.map_or(true, |(_, p)| priority > p) {
            best = Some((index, priority));
        }
    }
    best.map(|(index, _)| index)
}
