//! Peer runtime orchestration.
//!
//! A running peer is three tasks sharing one cancellation token:
//!
//! - the history server, answering `GET /history`
//! - the sync loop, pulling longer histories from known peers
//! - the chat engine supervisor, owning the external engine process
//!
//! The listener is bound before anything else starts so the engine and the
//! sync loop see the real (possibly ephemeral) port as the peer's identity.
//! The bind address and the advertised ip are separate: other peers learn
//! `node.ip` from our messages, while the socket usually listens on every
//! interface.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use peerchat_protocol::PeerKey;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{AppState, ServerConfig, create_router};
use crate::clock::{Clock, SystemClock};
use crate::fetch::{HttpPeerFetcher, PeerFetch};
use crate::history::HistoryStore;
use crate::local::{ChatEngine, EngineConfig, EngineIdentity, format_exit_status};
use crate::sync::{SyncConfig, SyncLoop};

/// Identity of this peer on the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address other peers reach us at, stamped into our messages
    /// (default: 127.0.0.1).
    pub ip: String,
    /// Address the history server listens on (default: 0.0.0.0).
    pub bind: String,
    /// Port to bind; 0 picks a free port (default: 0).
    pub port: u16,
    /// Name shown next to our messages (default: "user").
    pub display_name: String,
    /// Chat room to join (default: "general").
    pub room: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".to_string(),
            bind: "0.0.0.0".to_string(),
            port: 0,
            display_name: "user".to_string(),
            room: "general".to_string(),
        }
    }
}

/// Everything a peer needs to start.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub node: NodeConfig,
    pub history_file: PathBuf,
    pub reset_on_start: bool,
    pub server: ServerConfig,
    pub sync: SyncConfig,
    pub engine: EngineConfig,
}

/// A started peer.
pub struct PeerRuntime {
    local_addr: SocketAddr,
    self_key: PeerKey,
    store: Arc<HistoryStore>,
    sync_loop: Option<Arc<SyncLoop>>,
    token: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl PeerRuntime {
    /// Start a peer with the system clock and the HTTP fetcher.
    pub async fn start(config: RuntimeConfig) -> Result<Self> {
        let fetcher = HttpPeerFetcher::new().context("building HTTP client")?;
        Self::start_with(config, Arc::new(SystemClock), Arc::new(fetcher)).await
    }

    /// Start a peer with an injected clock and fetcher.
    pub async fn start_with(
        config: RuntimeConfig,
        clock: Arc<dyn Clock>,
        fetcher: Arc<dyn PeerFetch>,
    ) -> Result<Self> {
        let ip: IpAddr = config
            .node
            .ip
            .trim()
            .parse()
            .with_context(|| format!("invalid node ip '{}'", config.node.ip))?;
        let bind: IpAddr = config
            .node
            .bind
            .trim()
            .parse()
            .with_context(|| format!("invalid bind address '{}'", config.node.bind))?;
        if ip.is_unspecified() {
            warn!(
                "Advertised ip {} is not reachable by other peers; set node.ip",
                ip
            );
        }

        let store = Arc::new(HistoryStore::new(&config.history_file));
        if config.reset_on_start {
            store
                .clear()
                .await
                .with_context(|| format!("resetting history at {}", store.path().display()))?;
            debug!("History reset at {}", store.path().display());
        }

        let listener = TcpListener::bind(SocketAddr::new(bind, config.node.port))
            .await
            .with_context(|| format!("binding to {}:{}", bind, config.node.port))?;
        let local_addr = listener.local_addr().context("reading bound address")?;
        let self_key = PeerKey::new(ip, local_addr.port());
        info!("Listening on http://{} as {}", local_addr, self_key);

        let token = CancellationToken::new();
        let mut tasks = Vec::new();

        let state = AppState::new(Arc::clone(&store), &config.server, Arc::clone(&clock));
        let app = create_router(state);
        let serve_token = token.clone();
        tasks.push((
            "server",
            tokio::spawn(async move {
                let result = axum::serve(
                    listener,
                    app.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .with_graceful_shutdown(serve_token.cancelled_owned())
                .await;
                if let Err(e) = result {
                    warn!("History server stopped with error: {:?}", e);
                }
            }),
        ));

        let sync_loop = if config.sync.enabled {
            let sync_loop = Arc::new(SyncLoop::new(
                Arc::clone(&store),
                fetcher,
                self_key,
                config.sync.clone(),
                clock,
            ));
            let runner = Arc::clone(&sync_loop);
            let sync_token = token.clone();
            tasks.push((
                "sync",
                tokio::spawn(async move { runner.run(sync_token).await }),
            ));
            Some(sync_loop)
        } else {
            info!("Sync loop disabled");
            None
        };

        if config.engine.enabled {
            let identity = EngineIdentity {
                ip: ip.to_string(),
                port: self_key.port,
                display_name: config.node.display_name.clone(),
                room: config.node.room.clone(),
                history_file: store.path().to_path_buf(),
            };
            tasks.push((
                "engine",
                tokio::spawn(supervise_engine(config.engine.clone(), identity, token.clone())),
            ));
        }

        Ok(Self {
            local_addr,
            self_key,
            store,
            sync_loop,
            token,
            tasks,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn self_key(&self) -> PeerKey {
        self.self_key
    }

    pub fn store(&self) -> &Arc<HistoryStore> {
        &self.store
    }

    /// `None` when sync is disabled.
    pub fn sync_loop(&self) -> Option<&Arc<SyncLoop>> {
        self.sync_loop.as_ref()
    }

    /// Token observed by every task. Cancelling it starts shutdown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Run until Ctrl-C, SIGTERM or the chat engine exits, then shut down.
    pub async fn run_until_signal(self) -> Result<()> {
        tokio::select! {
            _ = shutdown_signal() => info!("Shutdown signal received"),
            _ = self.token.cancelled() => info!("Runtime cancelled"),
        }
        self.shutdown().await
    }

    /// Cancel every task and wait for them to finish.
    pub async fn shutdown(self) -> Result<()> {
        self.token.cancel();
        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                warn!("{} task did not finish cleanly: {}", name, e);
            }
        }
        info!("Peer {} stopped", self.self_key);
        Ok(())
    }
}

/// Launch the engine and hold it until it exits or the runtime stops.
///
/// A launch failure is logged and leaves the other tasks running. An engine
/// that exits on its own ends the runtime.
async fn supervise_engine(config: EngineConfig, identity: EngineIdentity, token: CancellationToken) {
    let mut handle = match ChatEngine::launch(&config, &identity) {
        Ok(handle) => handle,
        Err(e) => {
            warn!("Chat engine not started, continuing without it: {:?}", e);
            return;
        }
    };

    let exited = tokio::select! {
        status = handle.wait() => Some(status),
        _ = token.cancelled() => None,
    };

    match exited {
        Some(Ok(status)) => {
            info!("Chat engine {} {}, stopping peer", handle.pid, status);
            token.cancel();
        }
        Some(Err(e)) => {
            warn!("Lost track of chat engine {}: {:?}", handle.pid, e);
            token.cancel();
        }
        None => {
            if let Err(e) = handle.kill().await {
                warn!("Failed to stop chat engine {}: {:?}", handle.pid, e);
            } else if let Some((code, signal)) = handle.check_exit_status() {
                debug!("Chat engine {}", format_exit_status(code, signal));
            }
        }
    }
}

/// Resolve on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
