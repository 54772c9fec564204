//! Shared utilities for integration tests.
//!
//! Provides a local HTTP target that records every request it receives.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// One request seen by the capture server.
#[derive(Debug, Clone)]
pub struct Captured {
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Captured {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body_str(&self) -> &str {
        std::str::from_utf8(&self.body).expect("body is not UTF-8")
    }
}

#[derive(Clone)]
struct ServerState {
    captured: Arc<Mutex<Vec<Captured>>>,
    status: StatusCode,
    delay: Duration,
}

/// HTTP target answering every POST to `/hook` with a fixed status.
pub struct CaptureServer {
    addr: SocketAddr,
    captured: Arc<Mutex<Vec<Captured>>>,
    handle: JoinHandle<()>,
}

impl CaptureServer {
    pub async fn start(status: StatusCode) -> Self {
        Self::start_with_delay(status, Duration::ZERO).await
    }

    /// Start a server that waits `delay` before answering.
    pub async fn start_with_delay(status: StatusCode, delay: Duration) -> Self {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let state = ServerState {
            captured: Arc::clone(&captured),
            status,
            delay,
        };

        let app = Router::new().route("/hook", post(capture)).with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind capture server");
        let addr = listener.local_addr().expect("Failed to get local addr");

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("capture server failed");
        });

        Self {
            addr,
            captured,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}/hook", self.addr)
    }

    pub async fn captured(&self) -> Vec<Captured> {
        self.captured.lock().await.clone()
    }

    /// Poll until at least `count` requests arrived or `timeout` elapses.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Captured> {
        let deadline = Instant::now() + timeout;
        loop {
            let captured = self.captured().await;
            if captured.len() >= count || Instant::now() >= deadline {
                return captured;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for CaptureServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn capture(
    State(state): State<ServerState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    state.captured.lock().await.push(Captured {
        headers,
        body: body.to_vec(),
    });
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    (state.status, "Scheduled polling of build")
}
