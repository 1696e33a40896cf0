//! End-to-end tests over real sockets.

use std::time::Duration;

use peerchat::api::ServerConfig;
use peerchat::fetch::{FetchError, HttpPeerFetcher};
use peerchat::local::EngineConfig;
use peerchat::sync::SyncConfig;
use peerchat::{NodeConfig, PeerRuntime, RuntimeConfig};
use peerchat_protocol::{Message, PeerKey};
use tempfile::TempDir;

fn runtime_config(dir: &TempDir, name: &str) -> RuntimeConfig {
    RuntimeConfig {
        node: NodeConfig {
            display_name: name.to_string(),
            bind: "127.0.0.1".to_string(),
            ..NodeConfig::default()
        },
        history_file: dir.path().join(format!("{name}.json")),
        reset_on_start: true,
        server: ServerConfig::default(),
        sync: SyncConfig {
            tick_interval_secs: 1,
            fetch_timeout_secs: 2,
            ..SyncConfig::default()
        },
        engine: EngineConfig {
            enabled: false,
            ..EngineConfig::default()
        },
    }
}

async fn wait_for_len(runtime: &PeerRuntime, len: usize) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while runtime.store().load_or_empty().await.len() < len {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("history never reached {len} messages"));
}

#[tokio::test]
async fn test_two_peers_converge_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let alice = PeerRuntime::start(runtime_config(&dir, "alice")).await.unwrap();
    let bob = PeerRuntime::start(runtime_config(&dir, "bob")).await.unwrap();
    assert_ne!(alice.local_addr().port(), 0);
    assert_ne!(alice.self_key(), bob.self_key());

    for i in 0..5 {
        alice
            .store()
            .append(Message::new(alice.self_key(), "alice", format!("hi {i}"), i))
            .await
            .unwrap();
    }
    bob.store()
        .append(Message::new(alice.self_key(), "alice", "hi 0", 0))
        .await
        .unwrap();

    wait_for_len(&bob, 5).await;
    assert_eq!(
        bob.store().load().await.unwrap(),
        alice.store().load().await.unwrap()
    );
    let ledger = bob.sync_loop().unwrap().ledger();
    assert!(ledger.last_contact(&alice.self_key()).is_some());

    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_fetcher_against_running_peer() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = runtime_config(&dir, "carol");
    config.sync.enabled = false;
    config.server.rate_limit_requests = 1;
    let carol = PeerRuntime::start(config).await.unwrap();
    assert!(carol.sync_loop().is_none());

    carol
        .store()
        .append(Message::new(carol.self_key(), "carol", "hello", 1))
        .await
        .unwrap();

    let fetcher = HttpPeerFetcher::new().unwrap();
    let history = fetcher
        .fetch_history(&carol.self_key(), Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].author, "carol");

    let err = fetcher
        .fetch_history(&carol.self_key(), Duration::from_secs(2))
        .await
        .unwrap_err();
    match err {
        FetchError::RateLimited { retry_after, .. } => {
            assert!(retry_after.is_some_and(|d| d <= Duration::from_secs(60)));
        }
        other => panic!("expected rate limit, got {other:?}"),
    }

    carol.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_history_maps_to_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = runtime_config(&dir, "dave");
    config.sync.enabled = false;
    config.reset_on_start = false;
    let dave = PeerRuntime::start(config).await.unwrap();

    let fetcher = HttpPeerFetcher::new().unwrap();
    let err = fetcher
        .fetch_history(&dave.self_key(), Duration::from_secs(2))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");

    dave.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reset_on_start_clears_previous_history() {
    let dir = tempfile::tempdir().unwrap();
    let config = runtime_config(&dir, "erin");
    tokio::fs::write(&config.history_file, b"[{\"sender_ip\":\"10.0.0.2\",\"sender_port\":9001}]")
        .await
        .unwrap();

    let erin = PeerRuntime::start(config).await.unwrap();
    assert_eq!(erin.store().load().await, Some(Vec::new()));
    erin.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_engine_launch_failure_keeps_peer_serving() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = runtime_config(&dir, "frank");
    config.sync.enabled = false;
    config.engine = EngineConfig {
        enabled: true,
        program: "peerchat-no-such-engine".to_string(),
        args: vec![],
        working_dir: None,
    };
    let frank = PeerRuntime::start(config).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!frank.cancellation_token().is_cancelled());

    let fetcher = HttpPeerFetcher::new().unwrap();
    let history = fetcher
        .fetch_history(&frank.self_key(), Duration::from_secs(2))
        .await
        .unwrap();
    assert!(history.is_empty());

    frank.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_engine_exit_stops_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = runtime_config(&dir, "grace");
    config.engine = EngineConfig {
        enabled: true,
        program: "true".to_string(),
        args: vec![],
        working_dir: None,
    };
    let grace = PeerRuntime::start(config).await.unwrap();

    let token = grace.cancellation_token();
    tokio::time::timeout(Duration::from_secs(5), token.cancelled())
        .await
        .unwrap();
    grace.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_invalid_node_ip_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = runtime_config(&dir, "heidi");
    config.node.ip = "not-an-ip".to_string();

    let err = PeerRuntime::start(config).await.err().unwrap();
    assert!(err.to_string().contains("not-an-ip"));
}

#[tokio::test]
async fn test_bind_address_is_separate_from_advertised_ip() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = runtime_config(&dir, "ivan");
    config.sync.enabled = false;
    config.node.ip = "10.9.8.7".to_string();
    config.node.bind = "127.0.0.1".to_string();
    let ivan = PeerRuntime::start(config).await.unwrap();

    assert_eq!(ivan.local_addr().ip().to_string(), "127.0.0.1");
    assert_eq!(ivan.self_key().ip.to_string(), "10.9.8.7");
    assert_eq!(ivan.self_key().port, ivan.local_addr().port());

    let fetcher = HttpPeerFetcher::new().unwrap();
    let reachable: PeerKey = format!("127.0.0.1:{}", ivan.local_addr().port())
        .parse()
        .unwrap();
    let history = fetcher
        .fetch_history(&reachable, Duration::from_secs(2))
        .await
        .unwrap();
    assert!(history.is_empty());

    ivan.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_default_bind_listens_on_all_interfaces() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = runtime_config(&dir, "judy");
    config.sync.enabled = false;
    config.node.bind = NodeConfig::default().bind;
    let judy = PeerRuntime::start(config).await.unwrap();

    assert!(judy.local_addr().ip().is_unspecified());
    assert_eq!(judy.self_key().ip.to_string(), "127.0.0.1");

    judy.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_invalid_bind_address_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = runtime_config(&dir, "ken");
    config.node.bind = "everywhere".to_string();

    let err = PeerRuntime::start(config).await.err().unwrap();
    assert!(err.to_string().contains("everywhere"));
}
