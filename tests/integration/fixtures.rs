//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Scripted transports keyed by provider command
//! - Provider builders for subprocess and HTTP providers
//! - Small shell scripts standing in for provider CLIs

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use relay::config::ProviderConfig;
use relay::dispatch::{ExecutionResult, Invocation, Target, Transport};
use relay::{Error, Result};

/// How a scripted provider behaves when called.
#[derive(Debug, Clone)]
pub enum Script {
    /// Respond immediately with this text.
    Reply(String),
    /// Respond with this text after a delay.
    SlowReply(Duration, String),
    /// Fail as if the process exited with code 1 and this stderr.
    Fail(String),
    /// Never respond; only the invocation timeout ends the call.
    Hang,
}

/// Transport that answers from a script instead of running anything.
///
/// Invocation timeouts are honored the way the real transports honor them.
pub struct ScriptedTransport {
    scripts: HashMap<String, Script>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<(&str, Script)>) -> Arc<Self> {
        Arc::new(Self {
            scripts: scripts
                .into_iter()
                .map(|(name, script)| (name.to_string(), script))
                .collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Provider commands in the order they were called.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    async fn respond(&self, command: &str) -> Result<String> {
        match self.scripts.get(command).cloned() {
            Some(Script::Reply(text)) => Ok(text),
            Some(Script::SlowReply(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            Some(Script::Fail(stderr)) => Err(Error::TransportExit { code: 1, stderr }),
            Some(Script::Hang) => std::future::pending().await,
            None => Err(Error::Validation(format!("no script for {command}"))),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, invocation: &Invocation) -> Result<ExecutionResult> {
        let command = match &invocation.target {
            Target::Process { command, .. } => command.clone(),
            Target::Http { url, .. } => url.clone(),
        };
        self.calls.lock().unwrap().push(command.clone());

        let start = std::time::Instant::now();
        let response = tokio::time::timeout(invocation.timeout, self.respond(&command))
            .await
            .map_err(|_| Error::TransportTimeout {
                timeout: invocation.timeout,
            })??;
        Ok(ExecutionResult {
            response,
            model: command,
            latency_ms: start.elapsed().as_millis() as u64,
            tokens: 0,
        })
    }
}

/// A subprocess provider whose command is its own name.
pub fn provider(name: &str, capabilities: &[&str]) -> ProviderConfig {
    ProviderConfig::cli(name, name, &[], capabilities)
}

/// A provider that runs `sh -c script`.
pub fn sh_provider(name: &str, script: &str, capabilities: &[&str]) -> ProviderConfig {
    ProviderConfig::cli(name, "sh", &["-c", script], capabilities)
}

/// Review JSON as a provider would print it.
pub fn review_json(severity: &str, message: &str, summary: &str) -> String {
    serde_json::json!({
        "findings": [{ "severity": severity, "message": message }],
        "summary": summary,
    })
    .to_string()
}
