//! HTTP peer fetcher.

use std::time::Duration;

use log::debug;
use peerchat_protocol::{HistoryLog, HistoryResponse, PeerKey};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};

use super::error::{FetchError, FetchResult};

/// URL of a peer's history endpoint.
pub fn history_url(peer: &PeerKey) -> String {
    format!("http://{}/history", peer.socket_addr())
}

/// Fetches `/history` from remote peers over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPeerFetcher {
    client: Client,
}

impl HttpPeerFetcher {
    /// Create a fetcher with its own connection pool.
    pub fn new() -> FetchResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("peerchat/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Create a fetcher on top of an existing client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Issue a single `GET /history` to `peer`, bounded by `timeout`.
    pub async fn fetch_history(&self, peer: &PeerKey, timeout: Duration) -> FetchResult<HistoryLog> {
        let url = history_url(peer);
        debug!("Fetching history from {}", url);

        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(*peer, timeout, e))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                return Err(FetchError::RateLimited {
                    peer: *peer,
                    retry_after,
                });
            }
            status => {
                return Err(FetchError::InvalidResponse {
                    peer: *peer,
                    message: format!("unexpected status {status}"),
                });
            }
        }

        let body: HistoryResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    peer: *peer,
                    timeout,
                }
            } else {
                FetchError::InvalidResponse {
                    peer: *peer,
                    message: format!("failed to decode body: {e}"),
                }
            }
        })?;

        match body {
            HistoryResponse::History(log) => {
                debug!("Peer {} returned {} messages", peer, log.len());
                Ok(log)
            }
            HistoryResponse::NotFound(_) => Err(FetchError::NotFound { peer: *peer }),
        }
    }
}

fn classify(peer: PeerKey, timeout: Duration, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout { peer, timeout }
    } else {
        FetchError::Unreachable {
            peer,
            message: error.to_string(),
        }
    }
}
