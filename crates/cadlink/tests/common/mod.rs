//! Test utilities and common setup.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use cadlink::api;
use cadlink::bridge::{BridgeClient, CommandQueue, Listener};
use cadlink::db::Database;
use cadlink::generate::{CodeGenerator, GenerateError, GenerateResult};
use cadlink::session::SessionRepository;

/// Generator that answers with a fenced script echoing the prompt.
pub struct FakeGenerator;

#[async_trait]
impl CodeGenerator for FakeGenerator {
    async fn generate(&self, prompt: &str) -> GenerateResult<String> {
        if prompt.contains("fail") {
            return Err(GenerateError::ApiError {
                status: 500,
                message: "model overloaded".to_string(),
            });
        }
        Ok(format!("```python\n# {prompt}\nimport Part\n```"))
    }

    fn model(&self) -> &str {
        "fake"
    }
}

/// Router wired to an in-memory database and a live bridge listener.
pub struct TestApp {
    pub router: Router,
    pub sessions: SessionRepository,
    pub queue: CommandQueue,
    shutdown: CancellationToken,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub async fn test_app() -> TestApp {
    build(Some(Arc::new(FakeGenerator))).await
}

pub async fn test_app_without_generator() -> TestApp {
    build(None).await
}

async fn build(generator: Option<Arc<dyn CodeGenerator>>) -> TestApp {
    let db = Database::in_memory().await.unwrap();
    let sessions = SessionRepository::new(db.pool().clone());

    let queue = CommandQueue::new();
    let listener = Listener::new(
        "127.0.0.1:0".parse().unwrap(),
        Arc::new(queue.clone()),
        64 * 1024,
    );
    let socket = listener.bind().await.unwrap().unwrap();
    let addr = socket.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(listener.serve(socket, shutdown.clone()));

    let bridge = BridgeClient::new(addr, Duration::from_secs(2));
    let state = api::AppState::new(sessions.clone(), generator, bridge);

    TestApp {
        router: api::create_router(state),
        sessions,
        queue,
        shutdown,
    }
}

/// Router whose bridge address has nothing listening.
pub async fn test_app_with_dead_bridge() -> Router {
    let db = Database::in_memory().await.unwrap();
    let sessions = SessionRepository::new(db.pool().clone());
    let state = api::AppState::new(
        sessions,
        Some(Arc::new(FakeGenerator)),
        BridgeClient::new(unused_port(), Duration::from_secs(1)),
    );
    api::create_router(state)
}

/// A loopback address that was free a moment ago.
pub fn unused_port() -> SocketAddr {
    let socket = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap()
}

/// Send one request and decode the JSON body (`Value::Null` when empty).
pub async fn request(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder().uri(uri).method(method);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}
