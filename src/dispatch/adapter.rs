//! Provider adapters.
//!
//! An adapter owns everything provider specific: how a prompt becomes an
//! [`Invocation`] and how raw output becomes a [`ParsedResult`]. The queue,
//! transports, and dispatcher never look past this trait, so a new backend
//! only needs a new `Adapter` implementation.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{ProviderConfig, ProviderKind};
use crate::dispatch::transport::{Invocation, Target, Transport};
use crate::{rlog_debug, Result};

/// One structured issue reported by a reviewing provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Provider-specific keys not covered above.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Adapter-normalized provider output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedResult {
    pub findings: Vec<Finding>,
    pub summary: String,
    /// Original output, kept for diagnostics.
    pub raw: String,
}

/// Per-call overrides for [`Adapter::build_command`].
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub timeout: Option<Duration>,
}

impl BuildOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

#[async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;

    /// Produce transport parameters. Must not perform I/O.
    fn build_command(&self, prompt: &str, options: &BuildOptions) -> Invocation;

    /// Turn raw output into findings. Never fails.
    fn parse_response(&self, raw: &str) -> ParsedResult {
        parse_response(raw)
    }

    async fn execute(&self, prompt: &str, transport: &dyn Transport) -> Result<ParsedResult> {
        let invocation = self.build_command(prompt, &BuildOptions::default());
        let result = transport.execute(&invocation).await?;
        rlog_debug!(
            "Adapter {}: {} bytes from {} in {}ms",
            self.name(),
            result.response.len(),
            result.model,
            result.latency_ms
        );
        Ok(self.parse_response(&result.response))
    }
}

impl Finding {
    /// Build a finding from one element of a `findings` array.
    ///
    /// Providers disagree on shapes, so this never fails: a bare string
    /// becomes the message, `line` may be a number or a numeric string,
    /// and anything that does not fit a known field lands in `extra`.
    pub fn from_value(value: Value) -> Self {
        let map = match value {
            Value::Object(map) => map,
            Value::String(message) => {
                return Self {
                    message: Some(message),
                    ..Self::default()
                }
            }
            Value::Null => return Self::default(),
            other => {
                return Self {
                    message: Some(other.to_string()),
                    ..Self::default()
                }
            }
        };

        let mut finding = Self::default();
        for (key, value) in map {
            let slot = match key.as_str() {
                "severity" => Some(&mut finding.severity),
                "file" => Some(&mut finding.file),
                "message" => Some(&mut finding.message),
                "category" => Some(&mut finding.category),
                "suggestion" => Some(&mut finding.suggestion),
                _ => None,
            };
            match (slot, value) {
                (Some(slot), Value::String(text)) => *slot = Some(text),
                (_, Value::Null) => {}
                (None, value) if key == "line" => match line_number(&value) {
                    Some(line) => finding.line = Some(line),
                    None => {
                        finding.extra.insert(key, value);
                    }
                },
                (_, value) => {
                    finding.extra.insert(key, value);
                }
            }
        }
        finding
    }
}

fn line_number(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Top-level review shape. Fields stay untyped so one odd finding cannot
/// reject the whole payload.
#[derive(Debug, Deserialize)]
struct ReviewPayload {
    findings: Option<Value>,
    summary: Option<Value>,
}

impl ReviewPayload {
    fn from_json(text: &str) -> Option<Self> {
        let payload: Self = serde_json::from_str(text).ok()?;
        if payload.findings.is_none() && payload.summary.is_none() {
            return None;
        }
        Some(payload)
    }

    fn into_result(self, raw: &str) -> ParsedResult {
        let findings = match self.findings {
            Some(Value::Array(items)) => items.into_iter().map(Finding::from_value).collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(single) => vec![Finding::from_value(single)],
        };
        let summary = match self.summary {
            Some(Value::String(text)) => text,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        ParsedResult {
            findings,
            summary,
            raw: raw.to_string(),
        }
    }
}

fn fenced_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json)?[ \t]*\r?\n?(.*?)```").expect("valid fence regex"))
}

/// Parse provider output: whole-text JSON, then JSON in a fenced block,
/// then plain text with no findings.
pub fn parse_response(raw: &str) -> ParsedResult {
    let trimmed = raw.trim();

    if let Some(payload) = ReviewPayload::from_json(trimmed) {
        return payload.into_result(raw);
    }

    for captures in fenced_block_regex().captures_iter(trimmed) {
        if let Some(payload) = captures
            .get(1)
            .and_then(|block| ReviewPayload::from_json(block.as_str().trim()))
        {
            return payload.into_result(raw);
        }
    }

    ParsedResult {
        findings: Vec::new(),
        summary: trimmed.to_string(),
        raw: raw.to_string(),
    }
}

/// Adapter for subprocess providers: the prompt goes to stdin.
#[derive(Debug, Clone)]
pub struct CliAdapter {
    provider: ProviderConfig,
    default_timeout: Duration,
}

impl CliAdapter {
    pub fn new(provider: ProviderConfig, default_timeout: Duration) -> Self {
        Self {
            provider,
            default_timeout,
        }
    }
}

#[async_trait]
impl Adapter for CliAdapter {
    fn name(&self) -> &str {
        &self.provider.name
    }

    fn build_command(&self, prompt: &str, options: &BuildOptions) -> Invocation {
        Invocation {
            target: Target::Process {
                command: self.provider.command.clone().unwrap_or_default(),
                args: self.provider.args.clone(),
                cwd: self.provider.cwd.clone(),
            },
            input: prompt.to_string(),
            timeout: options
                .timeout
                .unwrap_or_else(|| self.provider.timeout_or(self.default_timeout)),
        }
    }
}

/// Adapter for chat-completions providers.
#[derive(Debug, Clone)]
pub struct ApiAdapter {
    provider: ProviderConfig,
    default_timeout: Duration,
}

impl ApiAdapter {
    pub fn new(provider: ProviderConfig, default_timeout: Duration) -> Self {
        Self {
            provider,
            default_timeout,
        }
    }
}

#[async_trait]
impl Adapter for ApiAdapter {
    fn name(&self) -> &str {
        &self.provider.name
    }

    fn build_command(&self, prompt: &str, options: &BuildOptions) -> Invocation {
        Invocation {
            target: Target::Http {
                url: self.provider.url.clone().unwrap_or_default(),
                model: self.provider.model.clone(),
                api_key: self.provider.api_key.clone(),
            },
            input: prompt.to_string(),
            timeout: options
                .timeout
                .unwrap_or_else(|| self.provider.timeout_or(self.default_timeout)),
        }
    }
}

/// Built-in adapter for a provider, chosen by its `type`.
pub fn adapter_for(provider: &ProviderConfig, default_timeout: Duration) -> Arc<dyn Adapter> {
    match provider.kind {
        ProviderKind::Cli => Arc::new(CliAdapter::new(provider.clone(), default_timeout)),
        ProviderKind::Api => Arc::new(ApiAdapter::new(provider.clone(), default_timeout)),
    }
}
