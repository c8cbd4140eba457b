//! Capability-routed dispatcher with ordered provider fallback.
//!
//! The `Dispatcher` is the facade callers use. For a capability it picks
//! the providers that declare it, in configuration order, and tries them
//! one at a time until one succeeds. Every failure is kept so that an
//! exhausted chain reports the full trail.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use indexmap::IndexMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, ProviderConfig, DEFAULT_HEALTH_TIMEOUT_MS, DEFAULT_TIMEOUT_MS};
use crate::dispatch::adapter::{adapter_for, Adapter, BuildOptions, ParsedResult};
use crate::dispatch::queue::{QueueStatus, TaskQueue};
use crate::dispatch::transport::{
    ExecutionResult, QueuedTransport, Target, Transport, TransportExecutor,
};
use crate::error::ProviderFailure;
use crate::util::elapsed_ms;
use crate::{rlog, rlog_debug, rlog_error, rlog_warn, Error, Result};

/// Capability names understood by the dispatcher.
pub mod capability {
    pub const REVIEW: &str = "review";
    pub const CODE_GEN: &str = "code-gen";
}

/// Prompt sent by health probes.
pub const HEALTH_PROMPT: &str = "Reply with the single word OK.";

/// Combines the results of several providers in multi-model mode.
/// Receives `(provider name, result)` pairs in configuration order.
pub type Consensus = Arc<dyn Fn(Vec<(String, ParsedResult)>) -> ParsedResult + Send + Sync>;

/// Default consensus: every finding from every provider, in provider order.
pub fn union_findings(results: Vec<(String, ParsedResult)>) -> ParsedResult {
    let mut combined = ParsedResult::default();
    let mut summaries = Vec::new();
    let mut raws = Vec::new();
    for (name, result) in results {
        combined.findings.extend(result.findings);
        if !result.summary.is_empty() {
            summaries.push(format!("{}: {}", name, result.summary));
        }
        raws.push(result.raw);
    }
    combined.summary = summaries.join("\n");
    combined.raw = raws.join("\n\n");
    combined
}

/// Wrap content in instructions asking for JSON findings.
pub fn review_prompt(content: &str) -> String {
    format!(
        "Review the following content for bugs, security issues, and maintainability problems.\n\
         Respond with JSON only, shaped as:\n\
         {{\"findings\": [{{\"severity\": \"high|medium|low\", \"file\": \"...\", \"line\": 1, \"message\": \"...\", \"suggestion\": \"...\"}}], \"summary\": \"...\"}}\n\n\
         {content}"
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderHealth {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProviderHealth {
    fn up(latency_ms: u64) -> Self {
        Self {
            available: true,
            latency_ms: Some(latency_ms),
            error: None,
        }
    }

    fn down(error: String) -> Self {
        Self {
            available: false,
            latency_ms: None,
            error: Some(error),
        }
    }
}

/// Per-provider availability, in configuration order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthReport {
    pub providers: IndexMap<String, ProviderHealth>,
}

impl HealthReport {
    pub fn available_count(&self) -> usize {
        self.providers.values().filter(|h| h.available).count()
    }
}

/// Facade over adapters, transports, and the optional task queue.
pub struct Dispatcher {
    providers: Vec<ProviderConfig>,
    custom_adapters: HashMap<String, Arc<dyn Adapter>>,
    /// Used for review and execute; may be queue-backed.
    transport: Arc<dyn Transport>,
    /// Used for health probes so they never wait behind queued work.
    direct: Arc<dyn Transport>,
    queue: Option<TaskQueue<ExecutionResult>>,
    default_timeout: Duration,
    health_timeout: Duration,
    multi_model: bool,
    consensus: Consensus,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field(
                "providers",
                &self.providers.iter().map(|p| &p.name).collect::<Vec<_>>(),
            )
            .field("multi_model", &self.multi_model)
            .field("queued", &self.queue.is_some())
            .field("default_timeout", &self.default_timeout)
            .field("health_timeout", &self.health_timeout)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Dispatcher over `providers` using `transport` for every call.
    pub fn new(providers: Vec<ProviderConfig>, transport: Arc<dyn Transport>) -> Self {
        Self {
            providers,
            custom_adapters: HashMap::new(),
            direct: Arc::clone(&transport),
            transport,
            queue: None,
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            health_timeout: Duration::from_millis(DEFAULT_HEALTH_TIMEOUT_MS),
            multi_model: false,
            consensus: Arc::new(union_findings),
            cancel: CancellationToken::new(),
        }
    }

    /// Build the production stack: real transports, queue-backed when
    /// `config.queue` is set, all sharing one cancellation token.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let cancel = CancellationToken::new();
        let executor: Arc<dyn Transport> =
            Arc::new(TransportExecutor::with_cancellation(cancel.clone())?);

        let mut dispatcher = Self::new(config.provider_list(), Arc::clone(&executor))
            .with_default_timeout(config.default_timeout())
            .with_health_timeout(config.health_timeout())
            .with_multi_model(config.multi_model);
        dispatcher.cancel = cancel;

        if config.queue {
            let queue = TaskQueue::new(config.max_concurrent, config.default_timeout())?;
            dispatcher.transport = Arc::new(QueuedTransport::new(executor, queue.clone()));
            dispatcher.queue = Some(queue);
        }
        rlog_debug!("Dispatcher::from_config {:?}", dispatcher);
        Ok(dispatcher)
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    pub fn with_multi_model(mut self, enabled: bool) -> Self {
        self.multi_model = enabled;
        self
    }

    pub fn with_consensus<F>(mut self, consensus: F) -> Self
    where
        F: Fn(Vec<(String, ParsedResult)>) -> ParsedResult + Send + Sync + 'static,
    {
        self.consensus = Arc::new(consensus);
        self
    }

    /// Replace the built-in adapter for the provider called `name`.
    pub fn with_adapter(mut self, name: &str, adapter: Arc<dyn Adapter>) -> Self {
        self.custom_adapters.insert(name.to_string(), adapter);
        self
    }

    pub fn providers(&self) -> &[ProviderConfig] {
        &self.providers
    }

    pub fn queue_status(&self) -> Option<QueueStatus> {
        self.queue.as_ref().map(TaskQueue::status)
    }

    /// Abort in-flight transport calls and discard queued ones.
    pub fn shutdown(&self) {
        rlog!("Dispatcher: shutting down");
        self.cancel.cancel();
        if let Some(queue) = &self.queue {
            queue.clear();
        }
    }

    /// Review `content` with the first provider that succeeds, or with all
    /// eligible providers at once in multi-model mode.
    ///
    /// # Errors
    ///
    /// `NoProviderAvailable` if no provider reviews, `AllProvidersFailed`
    /// if every eligible provider fails.
    pub async fn review(&self, content: &str) -> Result<ParsedResult> {
        let prompt = review_prompt(content);
        let prompt = prompt.as_str();
        if self.multi_model {
            return self.review_concurrently(prompt).await;
        }
        self.with_fallback(capability::REVIEW, |adapter| async move {
            adapter.execute(prompt, self.transport.as_ref()).await
        })
        .await
    }

    /// Run a code-generation prompt and return the raw result.
    pub async fn execute(&self, prompt: &str) -> Result<ExecutionResult> {
        self.execute_capability(capability::CODE_GEN, prompt).await
    }

    /// Run `prompt` on the first provider with `capability` that succeeds.
    pub async fn execute_capability(
        &self,
        capability: &str,
        prompt: &str,
    ) -> Result<ExecutionResult> {
        self.with_fallback(capability, |adapter| async move {
            let invocation = adapter.build_command(prompt, &BuildOptions::default());
            self.transport.execute(&invocation).await
        })
        .await
    }

    /// Probe every provider concurrently with a short timeout.
    pub async fn health(&self) -> HealthReport {
        let probes = self.providers.iter().map(|provider| self.probe(provider));
        let providers = join_all(probes).await.into_iter().collect();
        HealthReport { providers }
    }

    fn adapter(&self, provider: &ProviderConfig) -> Arc<dyn Adapter> {
        match self.custom_adapters.get(&provider.name) {
            Some(adapter) => Arc::clone(adapter),
            None => adapter_for(provider, self.default_timeout),
        }
    }

    fn eligible(&self, capability: &str) -> Result<Vec<&ProviderConfig>> {
        let eligible: Vec<_> = self
            .providers
            .iter()
            .filter(|p| p.supports(capability))
            .collect();
        if eligible.is_empty() {
            rlog_error!("Dispatcher: no provider supports {}", capability);
            return Err(Error::NoProviderAvailable {
                capability: capability.to_string(),
            });
        }
        Ok(eligible)
    }

    async fn with_fallback<T, F, Fut>(&self, capability: &str, attempt: F) -> Result<T>
    where
        F: Fn(Arc<dyn Adapter>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let eligible = self.eligible(capability)?;
        let mut failures = Vec::new();
        for provider in eligible {
            rlog!("Dispatcher: {} via {}", capability, provider.name);
            let start = Instant::now();
            match attempt(self.adapter(provider)).await {
                Ok(result) => {
                    rlog!(
                        "Dispatcher: {} served by {} in {}ms",
                        capability,
                        provider.name,
                        elapsed_ms(start)
                    );
                    return Ok(result);
                }
                Err(error) => {
                    rlog_warn!(
                        "Dispatcher: {} failed on {}: {}; falling back",
                        capability,
                        provider.name,
                        error
                    );
                    failures.push(ProviderFailure {
                        provider: provider.name.clone(),
                        error,
                    });
                }
            }
        }
        Err(exhausted(capability, failures))
    }

    async fn review_concurrently(&self, prompt: &str) -> Result<ParsedResult> {
        let eligible = self.eligible(capability::REVIEW)?;
        rlog!(
            "Dispatcher: multi-model review across {} providers",
            eligible.len()
        );
        let attempts = eligible.iter().map(|provider| {
            let adapter = self.adapter(provider);
            async move {
                let outcome = adapter.execute(prompt, self.transport.as_ref()).await;
                (provider.name.clone(), outcome)
            }
        });

        let mut successes = Vec::new();
        let mut failures = Vec::new();
        for (provider, outcome) in join_all(attempts).await {
            match outcome {
                Ok(parsed) => successes.push((provider, parsed)),
                Err(error) => {
                    rlog_warn!("Dispatcher: multi-model {} failed: {}", provider, error);
                    failures.push(ProviderFailure { provider, error });
                }
            }
        }

        if successes.is_empty() {
            return Err(exhausted(capability::REVIEW, failures));
        }
        Ok((self.consensus)(successes))
    }

    async fn probe(&self, provider: &ProviderConfig) -> (String, ProviderHealth) {
        let name = provider.name.clone();
        let timeout = provider
            .timeout_or(self.health_timeout)
            .min(self.health_timeout);
        let invocation = self
            .adapter(provider)
            .build_command(HEALTH_PROMPT, &BuildOptions::with_timeout(timeout));

        // Resolve what will actually be spawned, from where it will be spawned.
        if let Target::Process { command, cwd, .. } = &invocation.target {
            if !command_resolves(command, cwd.as_deref()) {
                return (name, ProviderHealth::down(format!("command not found: {command}")));
            }
        }

        let start = Instant::now();
        let health = match self.direct.execute(&invocation).await {
            Ok(_) => ProviderHealth::up(elapsed_ms(start)),
            Err(error) if error.is_timeout() => {
                ProviderHealth::down(format!("timed out after {timeout:?}"))
            }
            Err(error) => ProviderHealth::down(error.to_string()),
        };
        rlog_debug!("Dispatcher: health {} -> {:?}", name, health);
        (name, health)
    }
}

fn command_resolves(command: &str, cwd: Option<&Path>) -> bool {
    match cwd {
        Some(dir) => which::which_in(command, std::env::var_os("PATH"), dir).is_ok(),
        None => which::which(command).is_ok(),
    }
}

fn exhausted(capability: &str, failures: Vec<ProviderFailure>) -> Error {
    rlog_error!(
        "Dispatcher: all {} providers failed for {}",
        failures.len(),
        capability
    );
    Error::AllProvidersFailed {
        capability: capability.to_string(),
        failures,
    }
}
