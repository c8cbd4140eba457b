//! Subprocess and HTTP transports driven through the dispatcher.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use relay::config::{Config, ProviderConfig};
use relay::dispatch::{CliTransport, Dispatcher, Invocation, Target, Transport, TransportExecutor};
use relay::Error;

use crate::fixtures::sh_provider;

fn chat_reply(content: &str) -> serde_json::Value {
    json!({
        "model": "mock-model",
        "choices": [{ "message": { "role": "assistant", "content": content } }],
        "usage": { "total_tokens": 17 }
    })
}

#[tokio::test]
async fn test_cli_failure_surfaces_exit_code_and_stderr() {
    let transport = CliTransport::new();
    let invocation = Invocation {
        target: Target::Process {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "echo boom >&2; exit 1".to_string()],
            cwd: None,
        },
        input: "prompt".to_string(),
        timeout: Duration::from_secs(5),
    };

    let err = transport.execute(&invocation).await.unwrap_err();
    assert!(matches!(err, Error::TransportExit { code: 1, .. }));
    assert!(err.to_string().contains("boom"));
}

#[tokio::test]
async fn test_cli_provider_runs_in_configured_cwd() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("marker.txt"), "found-me").unwrap();

    let mut local = sh_provider("local", "cat marker.txt", &["code-gen"]);
    local.cwd = Some(dir.path().to_path_buf());
    let config = Config::default().with_provider(local);
    let dispatcher = Dispatcher::from_config(&config).unwrap();

    let result = dispatcher.execute("ignored").await.unwrap();
    assert_eq!(result.response, "found-me");
    assert_eq!(result.model, "sh");
}

#[tokio::test]
async fn test_api_provider_review_through_dispatcher() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply(
            "```json\n{\"findings\":[{\"severity\":\"medium\",\"file\":\"lib.rs\",\"line\":9,\"message\":\"unchecked index\"}],\"summary\":\"one finding\"}\n```",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/v1/chat/completions", server.uri());
    let config = Config::default().with_provider(
        ProviderConfig::api("hosted", &url, Some("mock-model"), &["review"]).with_api_key("sk-test"),
    );
    let dispatcher = Dispatcher::from_config(&config).unwrap();

    let parsed = dispatcher.review("let x = v[i];").await.unwrap();
    assert_eq!(parsed.summary, "one finding");
    assert_eq!(parsed.findings[0].file.as_deref(), Some("lib.rs"));
    assert_eq!(parsed.findings[0].line, Some(9));
}

#[tokio::test]
async fn test_api_error_falls_back_to_cli_provider() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(1)
        .mount(&server)
        .await;

    let config = Config::default()
        .with_provider(ProviderConfig::api("hosted", &server.uri(), None, &["code-gen"]))
        .with_provider(sh_provider("local", "cat >/dev/null; echo generated", &["code-gen"]));
    let dispatcher = Dispatcher::from_config(&config).unwrap();

    let result = dispatcher.execute("write it").await.unwrap();
    assert_eq!(result.response.trim(), "generated");
}

#[tokio::test]
async fn test_executor_reports_tokens_only_for_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("hi")))
        .mount(&server)
        .await;

    let executor = TransportExecutor::new().unwrap();
    let http = executor
        .execute(&Invocation {
            target: Target::Http {
                url: server.uri(),
                model: None,
                api_key: None,
            },
            input: "hello".to_string(),
            timeout: Duration::from_secs(5),
        })
        .await
        .unwrap();
    assert_eq!(http.response, "hi");
    assert_eq!(http.model, "mock-model");
    assert_eq!(http.tokens, 17);

    let process = executor
        .execute(&Invocation {
            target: Target::Process {
                command: "cat".to_string(),
                args: vec![],
                cwd: None,
            },
            input: "hello".to_string(),
            timeout: Duration::from_secs(5),
        })
        .await
        .unwrap();
    assert_eq!(process.response, "hello");
    assert_eq!(process.tokens, 0);
}

#[tokio::test]
async fn test_shutdown_cancels_in_flight_subprocess() {
    let config = Config::default().with_provider(sh_provider("slow", "sleep 10", &["code-gen"]));
    let dispatcher = std::sync::Arc::new(Dispatcher::from_config(&config).unwrap());

    let call = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.execute("x").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    let start = std::time::Instant::now();
    dispatcher.shutdown();

    let err = call.await.unwrap().unwrap_err();
    assert!(start.elapsed() < Duration::from_secs(2));
    let Error::AllProvidersFailed { failures, .. } = err else {
        panic!("expected AllProvidersFailed");
    };
    assert!(matches!(failures[0].error, Error::Cancelled));
}
