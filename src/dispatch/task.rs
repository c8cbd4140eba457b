//! Task data model for the dispatch queue.
//!
//! A task wraps one asynchronous unit of work together with the
//! scheduling metadata the queue needs: an id for dedup, a priority,
//! and an optional timeout override.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;

/// Identifier of a queued task, caller-supplied or generated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Scheduling priority. Higher values start first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    pub const URGENT: Priority = Priority(10);
    pub const NORMAL: Priority = Priority(5);
    pub const LOW: Priority = Priority(1);
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// A unit of queued work producing a `T`.
pub struct Task<T> {
    pub id: TaskId,
    pub priority: Priority,
    /// Overrides the queue's default timeout when set.
    pub timeout: Option<Duration>,
    /// Diagnostics only; ordering never looks at it.
    pub enqueued_at: DateTime<Utc>,
    pub(crate) work: BoxFuture<'static, Result<T>>,
}

impl<T> Task<T> {
    /// Wrap a future as a task with a generated id and normal priority.
    pub fn new<F>(work: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            id: TaskId::new(),
            priority: Priority::NORMAL,
            timeout: None,
            enqueued_at: Utc::now(),
            work: work.boxed(),
        }
    }

    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .field("enqueued_at", &self.enqueued_at)
            .finish_non_exhaustive()
    }
}
