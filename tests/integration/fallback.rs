//! Capability routing and provider fallback through the dispatcher.

use std::time::Duration;

use relay::config::Config;
use relay::dispatch::{capability, Dispatcher};
use relay::Error;

use crate::fixtures::{provider, review_json, sh_provider, Script, ScriptedTransport};

#[tokio::test]
async fn test_second_provider_serves_when_first_fails() {
    let transport = ScriptedTransport::new(vec![
        ("alpha", Script::Fail("alpha crashed".to_string())),
        ("beta", Script::Reply(review_json("high", "sql injection", "one issue"))),
        ("gamma", Script::Reply(review_json("low", "unused", "never asked"))),
    ]);
    let dispatcher = Dispatcher::new(
        vec![
            provider("alpha", &["review"]),
            provider("beta", &["review"]),
            provider("gamma", &["review"]),
        ],
        transport.clone(),
    );

    let parsed = dispatcher.review("SELECT * FROM users WHERE id = $input").await.unwrap();
    assert_eq!(parsed.summary, "one issue");
    assert_eq!(parsed.findings.len(), 1);
    assert_eq!(parsed.findings[0].message.as_deref(), Some("sql injection"));
    assert_eq!(transport.calls(), vec!["alpha", "beta"]);
}

#[tokio::test]
async fn test_exhausted_chain_lists_every_failure_in_order() {
    let transport = ScriptedTransport::new(vec![
        ("alpha", Script::Fail("alpha crashed".to_string())),
        ("beta", Script::Fail("beta crashed".to_string())),
    ]);
    let dispatcher = Dispatcher::new(
        vec![provider("alpha", &["review"]), provider("beta", &["review"])],
        transport,
    );

    let err = dispatcher.review("x").await.unwrap_err();
    let message = err.to_string();
    let Error::AllProvidersFailed { failures, .. } = err else {
        panic!("expected AllProvidersFailed, got {message}");
    };
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].provider, "alpha");
    assert_eq!(failures[1].provider, "beta");
    assert!(message.contains("alpha crashed"));
    assert!(message.contains("beta crashed"));
}

#[tokio::test]
async fn test_timeout_counts_as_failure_and_falls_back() {
    let transport = ScriptedTransport::new(vec![
        ("stuck", Script::Hang),
        ("steady", Script::Reply("fn add(a: i32, b: i32) -> i32 { a + b }".to_string())),
    ]);
    let dispatcher = Dispatcher::new(
        vec![
            provider("stuck", &["code-gen"]).with_timeout_ms(50),
            provider("steady", &["code-gen"]),
        ],
        transport.clone(),
    );

    let result = dispatcher.execute("write add").await.unwrap();
    assert!(result.response.starts_with("fn add"));
    assert_eq!(result.model, "steady");
    assert_eq!(transport.calls(), vec!["stuck", "steady"]);
}

#[tokio::test]
async fn test_providers_without_capability_are_skipped() {
    let transport = ScriptedTransport::new(vec![
        ("reviewer", Script::Reply("unused".to_string())),
        ("writer", Script::Reply("generated".to_string())),
    ]);
    let dispatcher = Dispatcher::new(
        vec![provider("reviewer", &["review"]), provider("writer", &["code-gen", "review"])],
        transport.clone(),
    );

    let result = dispatcher
        .execute_capability(capability::CODE_GEN, "make it")
        .await
        .unwrap();
    assert_eq!(result.response, "generated");
    assert_eq!(transport.calls(), vec!["writer"]);
}

#[tokio::test]
async fn test_unknown_capability_has_no_provider() {
    let transport = ScriptedTransport::new(vec![]);
    let dispatcher = Dispatcher::new(vec![provider("reviewer", &["review"])], transport);
    let err = dispatcher.execute_capability("translate", "hola").await.unwrap_err();
    assert!(matches!(err, Error::NoProviderAvailable { ref capability } if capability == "translate"));
}

#[tokio::test]
async fn test_plain_text_review_becomes_summary() {
    let transport = ScriptedTransport::new(vec![(
        "terse",
        Script::Reply("Looks good to me.".to_string()),
    )]);
    let dispatcher = Dispatcher::new(vec![provider("terse", &["review"])], transport);
    let parsed = dispatcher.review("x").await.unwrap();
    assert!(parsed.findings.is_empty());
    assert_eq!(parsed.summary, "Looks good to me.");
}

#[tokio::test]
async fn test_multi_model_runs_providers_concurrently() {
    let transport = ScriptedTransport::new(vec![
        ("one", Script::SlowReply(Duration::from_millis(150), review_json("high", "a", "first"))),
        ("two", Script::SlowReply(Duration::from_millis(150), review_json("low", "b", "second"))),
    ]);
    let dispatcher = Dispatcher::new(
        vec![provider("one", &["review"]), provider("two", &["review"])],
        transport,
    )
    .with_multi_model(true);

    let start = std::time::Instant::now();
    let parsed = dispatcher.review("x").await.unwrap();
    assert!(start.elapsed() < Duration::from_millis(280));
    assert_eq!(parsed.findings.len(), 2);
    assert_eq!(parsed.summary, "one: first\ntwo: second");
}

#[tokio::test]
async fn test_from_config_falls_back_across_real_processes() {
    let config = Config::default()
        .with_provider(sh_provider("broken", "echo offline >&2; exit 3", &["review"]))
        .with_provider(sh_provider(
            "local",
            r#"cat >/dev/null; echo '{"findings":[],"summary":"clean"}'"#,
            &["review"],
        ));
    let dispatcher = Dispatcher::from_config(&config).unwrap();

    let parsed = dispatcher.review("fn main() {}").await.unwrap();
    assert_eq!(parsed.summary, "clean");
    assert_eq!(dispatcher.queue_status().unwrap().completed, 1);
    assert_eq!(dispatcher.queue_status().unwrap().failed, 1);
}
