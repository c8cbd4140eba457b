//! HTTP transport for chat-completions style providers.
//!
//! Sends `{ model, messages: [{ role: "user", content }] }` and reads back
//! the first choice. The whole request, body included, races the
//! invocation deadline; a lost race drops the request and with it the
//! connection.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::dispatch::transport::{ExecutionResult, Invocation, Target, Transport};
use crate::util::{elapsed_ms, truncate};
use crate::{rlog_debug, rlog_trace, Error, Result};

/// Longest error body kept in a `TransportStatus` error.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct ApiTransport {
    client: Client,
    cancel: CancellationToken,
}

impl ApiTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("relay/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// POST `input` as a single user message to `url`.
    ///
    /// # Errors
    ///
    /// - `TransportStatus` on a non-2xx response
    /// - `TransportTimeout` if the request outlives `timeout`
    /// - `InvalidResponse` if the body has no choices
    /// - `Http` for connection and decoding failures
    pub async fn post(
        &self,
        url: &str,
        model: Option<&str>,
        api_key: Option<&str>,
        input: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult> {
        let start = Instant::now();
        let call = self.send(url, model, api_key, input);
        let parsed = tokio::select! {
            result = tokio::time::timeout(timeout, call) => match result {
                Ok(parsed) => parsed?,
                Err(_) => {
                    rlog_debug!("ApiTransport: {} timed out after {:?}", url, timeout);
                    return Err(Error::TransportTimeout { timeout });
                }
            },
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
        };
        let latency_ms = elapsed_ms(start);

        let ChatResponse {
            model: echoed_model,
            choices,
            usage,
        } = parsed;
        let content = choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or_else(|| Error::InvalidResponse(format!("{url} returned no choices")))?;

        rlog_trace!("ApiTransport: content={}", content);
        Ok(ExecutionResult {
            response: content,
            model: echoed_model
                .or_else(|| model.map(String::from))
                .unwrap_or_default(),
            latency_ms,
            tokens: usage.map(|u| u.total_tokens).unwrap_or(0),
        })
    }

    async fn send(
        &self,
        url: &str,
        model: Option<&str>,
        api_key: Option<&str>,
        input: &str,
    ) -> Result<ChatResponse> {
        let body = ChatRequest {
            model,
            messages: [ChatMessage {
                role: "user",
                content: input,
            }],
        };
        let mut request = self.client.post(url).json(&body);
        if let Some(key) = api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        rlog_debug!("ApiTransport: POST {} -> {}", url, status);

        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(Error::TransportStatus {
                status: status.as_u16(),
                body: truncate(text.trim(), MAX_ERROR_BODY),
            });
        }
        Ok(response.json::<ChatResponse>().await?)
    }
}

#[async_trait]
impl Transport for ApiTransport {
    async fn execute(&self, invocation: &Invocation) -> Result<ExecutionResult> {
        match &invocation.target {
            Target::Http {
                url,
                model,
                api_key,
            } => {
                self.post(
                    url,
                    model.as_deref(),
                    api_key.as_deref(),
                    &invocation.input,
                    invocation.timeout,
                )
                .await
            }
            Target::Process { command, .. } => Err(Error::Validation(format!(
                "api transport cannot run process target {command}"
            ))),
        }
    }
}
