//! Outbound history fetches.
//!
//! Provides an HTTP client for pulling `GET /history` from a remote peer,
//! behind the [`PeerFetch`] trait so the sync loop can be driven by a scripted
//! fetcher in tests.

mod client;
mod error;

use std::time::Duration;

use async_trait::async_trait;
use peerchat_protocol::{HistoryLog, PeerKey};

pub use client::{HttpPeerFetcher, history_url};
pub use error::{FetchError, FetchResult};

/// Pull a remote peer's history.
///
/// Implementations issue exactly one request and never retry.
#[async_trait]
pub trait PeerFetch: Send + Sync {
    async fn fetch(&self, peer: &PeerKey, timeout: Duration) -> FetchResult<HistoryLog>;
}

#[async_trait]
impl PeerFetch for HttpPeerFetcher {
    async fn fetch(&self, peer: &PeerKey, timeout: Duration) -> FetchResult<HistoryLog> {
        self.fetch_history(peer, timeout).await
    }
}
