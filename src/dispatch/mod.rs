//! Multi-provider task dispatch.
//!
//! Layered bottom-up: a bounded priority [`TaskQueue`], transports that
//! run one [`Invocation`] as a subprocess or HTTP call, adapters that turn
//! prompts into invocations and parse responses, and the [`Dispatcher`]
//! facade that routes by capability with ordered fallback.

mod adapter;
mod api;
mod cli;
mod queue;
mod service;
mod task;
mod transport;

pub use adapter::{
    adapter_for, parse_response, Adapter, ApiAdapter, BuildOptions, CliAdapter, Finding,
    ParsedResult,
};
pub use api::ApiTransport;
pub use cli::CliTransport;
pub use queue::{QueueStatus, TaskHandle, TaskQueue};
pub use service::{
    capability, review_prompt, union_findings, Consensus, Dispatcher, HealthReport,
    ProviderHealth, HEALTH_PROMPT,
};
pub use task::{Priority, Task, TaskId};
pub use transport::{
    ExecutionResult, Invocation, QueuedTransport, Target, Transport, TransportExecutor,
};
