//! Forwarding tests against a local HTTP target.
//!
//! Run with: cargo test --test forwarding

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use common::CaptureServer;
use mq_post_relay::broker::MockBroker;
use mq_post_relay::config::{RelayConfig, RelayConfigSet};
use mq_post_relay::forward::{ForwardError, Forwarder, PayloadSink};
use mq_post_relay::relay::{RelayManager, RelayWorker, ShutdownSignal, SupervisorConfig};

const PUSH: &[u8] = br#"{"ref":"refs/heads/main"}"#;
const PUSH_FORM: &str = "payload=%7B%22ref%22%3A%22refs%2Fheads%2Fmain%22%7D";

fn forwarder() -> Forwarder {
    Forwarder::new(Duration::from_secs(10)).expect("Failed to build forwarder")
}

#[tokio::test]
async fn test_post_wire_format() {
    let server = CaptureServer::start(StatusCode::OK).await;

    let reply = forwarder()
        .post(PUSH, &server.url())
        .await
        .expect("post failed");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, "Scheduled polling of build");

    let captured = server.captured().await;
    assert_eq!(captured.len(), 1);
    let request = &captured[0];
    assert_eq!(request.body_str(), PUSH_FORM);
    assert_eq!(
        request.header("content-type"),
        Some("application/x-www-form-urlencoded")
    );
    assert_eq!(request.header("x-github-event"), Some("push"));
    assert_eq!(
        request.header("content-length"),
        Some(PUSH_FORM.len().to_string().as_str())
    );
}

#[tokio::test]
async fn test_non_2xx_is_an_error() {
    let server = CaptureServer::start(StatusCode::INTERNAL_SERVER_ERROR).await;

    let result = forwarder().post(PUSH, &server.url()).await;
    match result {
        Err(ForwardError::Status(status)) => assert_eq!(status, 500),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_slow_target_times_out() {
    let server = CaptureServer::start_with_delay(StatusCode::OK, Duration::from_secs(2)).await;
    let forwarder = Forwarder::new(Duration::from_millis(200)).unwrap();

    let result = forwarder.post(PUSH, &server.url()).await;
    match result {
        Err(ForwardError::Request(e)) => assert!(e.is_timeout(), "not a timeout: {}", e),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_replay_posts_twice() {
    let server = CaptureServer::start(StatusCode::OK).await;
    let relay = RelayConfig::new(1, "org/api", server.url());
    let forwarder = forwarder();

    forwarder.forward(PUSH, &relay).await;
    forwarder.forward(PUSH, &relay).await;

    let captured = server.captured().await;
    assert_eq!(captured.len(), 2);
    assert_eq!(captured[0].body, captured[1].body);
    assert_eq!(captured[0].body_str(), PUSH_FORM);
}

#[tokio::test]
async fn test_failed_target_does_not_stop_consumption() {
    let server = CaptureServer::start(StatusCode::INTERNAL_SERVER_ERROR).await;
    let broker = Arc::new(MockBroker::new());
    let forwarder = Arc::new(forwarder());
    let relay = RelayConfig::new(1, "org/api", server.url());

    let task = {
        let broker = Arc::clone(&broker);
        let forwarder = Arc::clone(&forwarder);
        tokio::spawn(async move {
            let shutdown = ShutdownSignal::new();
            let worker = RelayWorker::new(&relay, &*broker, &*forwarder, &shutdown, false);
            worker.run().await
        })
    };

    let sessions = broker.wait_for_sessions(1, Duration::from_secs(1)).await;
    sessions[0].deliver(br#"{"n":1}"#.to_vec());
    sessions[0].deliver(br#"{"n":2}"#.to_vec());

    let captured = server.wait_for(2, Duration::from_secs(5)).await;
    assert_eq!(captured.len(), 2);
    assert_eq!(captured[0].body_str(), "payload=%7B%22n%22%3A1%7D");
    assert_eq!(captured[1].body_str(), "payload=%7B%22n%22%3A2%7D");
    assert!(!task.is_finished());
    task.abort();
}

#[tokio::test]
async fn test_each_relay_posts_to_its_own_target() {
    let servers = [
        CaptureServer::start(StatusCode::OK).await,
        CaptureServer::start(StatusCode::OK).await,
        CaptureServer::start(StatusCode::OK).await,
    ];
    let keys = ["org/api", "org/web", "org/ops"];
    let relays = RelayConfigSet::new(
        keys.iter()
            .zip(&servers)
            .enumerate()
            .map(|(i, (key, server))| RelayConfig::new(i + 1, *key, server.url()))
            .collect(),
    )
    .unwrap();

    let broker = Arc::new(MockBroker::new());
    let manager = RelayManager::new(
        broker.clone(),
        Arc::new(forwarder()),
        SupervisorConfig {
            retry_interval: Duration::from_secs(60),
            retry_jitter: false,
            shutdown_on_push: false,
        },
    );
    let mut tasks = manager.spawn(relays);

    let sessions = broker.wait_for_sessions(3, Duration::from_secs(1)).await;
    assert_eq!(sessions.len(), 3);
    for session in &sessions {
        session.deliver(format!(r#"{{"repo":"{}"}}"#, session.routing_key()).into_bytes());
    }

    for (key, server) in keys.iter().zip(&servers) {
        let captured = server.wait_for(1, Duration::from_secs(5)).await;
        assert_eq!(captured.len(), 1, "{} target got no request", key);
        let expected = mq_post_relay::forward::encode_payload(
            format!(r#"{{"repo":"{}"}}"#, key).as_bytes(),
        );
        assert_eq!(captured[0].body_str(), expected);
    }

    tasks.abort_all();
}
