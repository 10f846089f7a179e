//! Mock node gateway for integration tests.
//!
//! Serves the execute endpoint from a table of canned replies keyed by the
//! command tokens (without the program name) and the events endpoint from a
//! fixed body.

#![allow(dead_code)]

use axum::Router;
use axum::extract::State;
use axum::routing::post;
use hive_bridge::BridgeConfig;
use hive_bridge::bridge::ViewConfig;
use hive_bridge::bridge::codec::SPLICER;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// How the mock answers one command.
#[derive(Clone)]
pub enum Reply {
    /// Query answer: `data` wrapped in `Out`, then in the envelope
    Payload(Value),
    /// Mutating command answer: free text in the envelope
    Text(String),
    /// Body sent as is
    Raw(String),
}

#[derive(Default)]
pub struct MockState {
    replies: Mutex<HashMap<String, Reply>>,
    seen: Mutex<Vec<String>>,
    events: Mutex<String>,
    event_connections: Mutex<u32>,
}

pub struct MockGateway {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

impl MockGateway {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/v3/execute", post(execute))
            .route("/v3/events", post(events))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    /// Answer `tokens` (space separated, program omitted) with `reply`.
    pub fn reply(&self, tokens: &str, reply: Reply) -> &Self {
        let key = tokens.split(' ').collect::<Vec<_>>().join(SPLICER);
        self.state.replies.lock().insert(key, reply);
        self
    }

    pub fn set_events(&self, body: &str) {
        *self.state.events.lock() = body.to_string();
    }

    /// Request bodies' `val` strings, in arrival order.
    pub fn seen(&self) -> Vec<String> {
        self.state.seen.lock().clone()
    }

    pub fn event_connections(&self) -> u32 {
        *self.state.event_connections.lock()
    }

    pub fn config(&self) -> BridgeConfig {
        BridgeConfig {
            gateway_url: format!("http://{}/v3/execute", self.addr),
            events_url: format!("http://{}/v3/events", self.addr),
            view: ViewConfig {
                attempts: 1,
                retry_delay_ms: 0,
            },
            request_timeout_secs: Some(5),
            ..BridgeConfig::default()
        }
    }
}

async fn execute(State(state): State<Arc<MockState>>, body: String) -> String {
    let request: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
    let joined = request["val"].as_str().unwrap_or_default().to_string();
    state.seen.lock().push(joined.clone());

    let key = joined
        .split_once(SPLICER)
        .map(|(_, tokens)| tokens.to_string())
        .unwrap_or_default();
    let reply = state.replies.lock().get(&key).cloned();
    match reply {
        Some(Reply::Payload(data)) => {
            let out = json!({ "data": data }).to_string();
            json!({ "val": out }).to_string()
        }
        Some(Reply::Text(text)) => json!({ "val": text }).to_string(),
        Some(Reply::Raw(body)) => body,
        None => json!({ "val": "unknown command" }).to_string(),
    }
}

async fn events(State(state): State<Arc<MockState>>) -> String {
    *state.event_connections.lock() += 1;
    state.events.lock().clone()
}

/// One event line with `data` as the wrapped payload.
pub fn event_line(topic: &str, data: Value) -> String {
    let out = json!({ "data": data }).to_string();
    let mut line = json!({ "result": { "topic": topic, "val": out } }).to_string();
    line.push('\n');
    line
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
