//! Concurrent health probing.

use std::time::{Duration, Instant};

use relay::config::{Config, ProviderConfig};
use relay::dispatch::Dispatcher;

use crate::fixtures::{provider, Script, ScriptedTransport};

#[tokio::test]
async fn test_slow_provider_does_not_delay_fast_one() {
    let config = Config {
        health_timeout_ms: 300,
        ..Config::default()
    }
    .with_provider(ProviderConfig::cli("fast", "cat", &[], &["review"]))
    .with_provider(ProviderConfig::cli("slow", "sleep", &["5"], &["review"]));
    let dispatcher = Dispatcher::from_config(&config).unwrap();

    let start = Instant::now();
    let report = dispatcher.health().await;
    let elapsed = start.elapsed();

    assert_eq!(report.providers.len(), 2);
    let fast = &report.providers["fast"];
    assert!(fast.available);
    assert!(fast.latency_ms.unwrap() < 300);

    let slow = &report.providers["slow"];
    assert!(!slow.available);
    assert!(slow.error.as_deref().unwrap().contains("timed out"));

    // Probes run side by side: total time tracks the slowest probe only.
    assert!(elapsed < Duration::from_secs(2));
}

#[tokio::test]
async fn test_missing_binary_is_reported_without_spawning() {
    let transport = ScriptedTransport::new(vec![("cat", Script::Reply("OK".to_string()))]);
    let dispatcher = Dispatcher::new(
        vec![
            ProviderConfig::cli("ghost", "relay-no-such-binary", &[], &["review"]),
            provider("cat", &["review"]),
        ],
        transport.clone(),
    );

    let report = dispatcher.health().await;
    assert!(!report.providers["ghost"].available);
    assert!(report.providers["cat"].available);
    assert_eq!(transport.calls(), vec!["cat"]);
}

#[tokio::test]
async fn test_health_bypasses_saturated_queue() {
    let config = Config {
        max_concurrent: 1,
        health_timeout_ms: 1_000,
        ..Config::default()
    }
    .with_provider(ProviderConfig::cli("busy", "sleep", &["3"], &["code-gen"]))
    .with_provider(ProviderConfig::cli("echo", "cat", &[], &["review"]));
    let dispatcher = std::sync::Arc::new(Dispatcher::from_config(&config).unwrap());

    // Occupy the only queue slot with a long call.
    let busy = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.execute("x").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(dispatcher.queue_status().unwrap().running, 1);

    let report = dispatcher.health().await;
    assert!(report.providers["echo"].available);

    dispatcher.shutdown();
    let _ = busy.await;
}

#[tokio::test]
async fn test_probe_timeout_never_exceeds_health_timeout() {
    let transport = ScriptedTransport::new(vec![("sh", Script::Hang)]);
    let dispatcher = Dispatcher::new(
        vec![ProviderConfig::cli("hang", "sh", &[], &["review"]).with_timeout_ms(60_000)],
        transport,
    )
    .with_health_timeout(Duration::from_millis(100));

    let start = Instant::now();
    let report = dispatcher.health().await;
    assert!(!report.providers["hang"].available);
    assert_eq!(
        report.providers["hang"].error.as_deref(),
        Some("timed out after 100ms")
    );
    assert!(start.elapsed() < Duration::from_secs(1));
}
