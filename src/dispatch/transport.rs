//! Transport contract shared by the subprocess and HTTP strategies.
//!
//! An adapter turns a prompt into an [`Invocation`]; a [`Transport`] runs
//! it and reports an [`ExecutionResult`]. [`TransportExecutor`] picks the
//! strategy from the invocation target, and [`QueuedTransport`] pushes any
//! transport through a [`TaskQueue`] for bounded concurrency.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::dispatch::api::ApiTransport;
use crate::dispatch::cli::CliTransport;
use crate::dispatch::queue::TaskQueue;
use crate::dispatch::task::{Priority, Task};
use crate::Result;

/// Where an invocation is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Process {
        command: String,
        args: Vec<String>,
        cwd: Option<PathBuf>,
    },
    Http {
        url: String,
        model: Option<String>,
        api_key: Option<String>,
    },
}

/// Fully resolved transport parameters for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub target: Target,
    /// Prompt text delivered on stdin or as the user message.
    pub input: String,
    pub timeout: Duration,
}

impl Invocation {
    /// Identifier reported when the provider does not echo a model.
    pub fn label(&self) -> String {
        match &self.target {
            Target::Process { command, .. } => command.clone(),
            Target::Http { model, url, .. } => model.clone().unwrap_or_else(|| url.clone()),
        }
    }
}

/// Normalized outcome of one transport call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub response: String,
    pub model: String,
    pub latency_ms: u64,
    /// Usage reported by API providers; always 0 for subprocesses.
    pub tokens: u64,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, invocation: &Invocation) -> Result<ExecutionResult>;
}

/// Runs process targets as subprocesses and HTTP targets as chat requests.
#[derive(Debug, Clone)]
pub struct TransportExecutor {
    cli: CliTransport,
    api: ApiTransport,
}

impl TransportExecutor {
    pub fn new() -> Result<Self> {
        Self::with_cancellation(CancellationToken::new())
    }

    /// Both strategies abort in-flight calls when `cancel` fires.
    pub fn with_cancellation(cancel: CancellationToken) -> Result<Self> {
        Ok(Self {
            cli: CliTransport::new().with_cancellation(cancel.clone()),
            api: ApiTransport::new()?.with_cancellation(cancel),
        })
    }
}

#[async_trait]
impl Transport for TransportExecutor {
    async fn execute(&self, invocation: &Invocation) -> Result<ExecutionResult> {
        match invocation.target {
            Target::Process { .. } => self.cli.execute(invocation).await,
            Target::Http { .. } => self.api.execute(invocation).await,
        }
    }
}

/// Routes every call through a shared task queue.
///
/// The queue's own timeout backs up the invocation deadline, so the task
/// is given the invocation timeout plus a small grace period for cleanup.
pub struct QueuedTransport {
    inner: Arc<dyn Transport>,
    queue: TaskQueue<ExecutionResult>,
    priority: Priority,
}

const QUEUE_GRACE: Duration = Duration::from_secs(5);

impl QueuedTransport {
    pub fn new(inner: Arc<dyn Transport>, queue: TaskQueue<ExecutionResult>) -> Self {
        Self {
            inner,
            queue,
            priority: Priority::NORMAL,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn queue(&self) -> &TaskQueue<ExecutionResult> {
        &self.queue
    }
}

#[async_trait]
impl Transport for QueuedTransport {
    async fn execute(&self, invocation: &Invocation) -> Result<ExecutionResult> {
        let inner = Arc::clone(&self.inner);
        let owned = invocation.clone();
        let task = Task::new(async move { inner.execute(&owned).await })
            .with_priority(self.priority)
            .with_timeout(invocation.timeout + QUEUE_GRACE);
        self.queue.enqueue(task).await
    }
}
