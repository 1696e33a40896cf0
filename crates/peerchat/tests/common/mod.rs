//! Test utilities and common setup.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Method, Request};
use chrono::{TimeZone, Utc};
use peerchat::api::{AppState, ServerConfig, create_router};
use peerchat::clock::{Clock, ManualClock};
use peerchat::fetch::{FetchError, FetchResult, PeerFetch};
use peerchat::history::HistoryStore;
use peerchat_protocol::{HistoryLog, Message, PeerKey};
use tempfile::TempDir;

/// Fixed start time for deterministic tests.
pub fn start_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(start_time()))
}

pub fn peer(addr: &str) -> PeerKey {
    addr.parse().unwrap()
}

pub fn message_from(sender: &str, content: &str) -> Message {
    Message::new(peer(sender), "tester", content, 1_714_564_800)
}

/// `count` messages all sent by `sender`.
pub fn history_from(sender: &str, count: usize) -> HistoryLog {
    (0..count)
        .map(|i| message_from(sender, &format!("message {i}")))
        .collect()
}

/// A history store in its own temp directory.
pub struct TestStore {
    pub store: Arc<HistoryStore>,
    _dir: TempDir,
}

impl TestStore {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(HistoryStore::new(dir.path().join("messages.json")));
        Self { store, _dir: dir }
    }

    pub async fn seeded(history: &[Message]) -> Self {
        let this = Self::new();
        this.store.save(history).await.unwrap();
        this
    }
}

/// Router over a temp store with a manual clock and the default 5/60s limit.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<HistoryStore>,
    pub clock: Arc<ManualClock>,
    _store: TestStore,
}

pub fn test_app() -> TestApp {
    test_app_with(ServerConfig::default())
}

pub fn test_app_with(config: ServerConfig) -> TestApp {
    let test_store = TestStore::new();
    let clock = manual_clock();
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let state = AppState::new(Arc::clone(&test_store.store), &config, dyn_clock);
    TestApp {
        router: create_router(state),
        store: Arc::clone(&test_store.store),
        clock,
        _store: test_store,
    }
}

/// `GET /history` as seen from `caller`.
pub fn history_request(caller: &str) -> Request<Body> {
    let addr: SocketAddr = caller.parse().unwrap();
    let mut request = Request::builder()
        .uri("/history")
        .method(Method::GET)
        .body(Body::empty())
        .unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

/// What a scripted peer answers.
#[derive(Debug, Clone)]
pub enum Scripted {
    History(HistoryLog),
    NotFound,
    Unreachable,
    Timeout,
    RateLimited,
}

/// [`PeerFetch`] that answers from a script and records every call.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    script: Mutex<HashMap<PeerKey, Scripted>>,
    calls: Mutex<Vec<PeerKey>>,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn answer(&self, peer_addr: &str, answer: Scripted) {
        self.script.lock().unwrap().insert(peer(peer_addr), answer);
    }

    pub fn calls(&self) -> Vec<PeerKey> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl PeerFetch for ScriptedFetcher {
    async fn fetch(&self, peer: &PeerKey, timeout: Duration) -> FetchResult<HistoryLog> {
        self.calls.lock().unwrap().push(*peer);
        let answer = self
            .script
            .lock()
            .unwrap()
            .get(peer)
            .cloned()
            .unwrap_or(Scripted::Unreachable);

        match answer {
            Scripted::History(log) => Ok(log),
            Scripted::NotFound => Err(FetchError::NotFound { peer: *peer }),
            Scripted::Unreachable => Err(FetchError::Unreachable {
                peer: *peer,
                message: "connection refused".to_string(),
            }),
            Scripted::Timeout => Err(FetchError::Timeout {
                peer: *peer,
                timeout,
            }),
            Scripted::RateLimited => Err(FetchError::RateLimited {
                peer: *peer,
                retry_after: Some(Duration::from_secs(30)),
            }),
        }
    }
}
