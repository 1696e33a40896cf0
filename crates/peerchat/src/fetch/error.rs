//! Peer fetch error types.

use std::time::Duration;

use peerchat_protocol::PeerKey;
use thiserror::Error;

/// Result type for peer fetches.
pub type FetchResult<T> = Result<T, FetchError>;

/// Why a remote history could not be obtained.
///
/// Every variant is an ordinary outcome for the sync loop: the peer is
/// skipped for the current cycle and tried again once its refill interval
/// has passed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection could not be established or was dropped.
    #[error("peer {peer} unreachable: {message}")]
    Unreachable { peer: PeerKey, message: String },

    /// The peer did not answer within the timeout.
    #[error("peer {peer} timed out after {timeout:?}")]
    Timeout { peer: PeerKey, timeout: Duration },

    /// The peer rejected us with 429.
    #[error("peer {peer} rate limited us")]
    RateLimited {
        peer: PeerKey,
        retry_after: Option<Duration>,
    },

    /// The peer has no history to share.
    #[error("peer {peer} has no history")]
    NotFound { peer: PeerKey },

    /// Unexpected status or undecodable body.
    #[error("invalid response from peer {peer}: {message}")]
    InvalidResponse { peer: PeerKey, message: String },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

impl FetchError {
    /// Short label for logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unreachable { .. } => "unreachable",
            Self::Timeout { .. } => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::NotFound { .. } => "not_found",
            Self::InvalidResponse { .. } => "invalid_response",
            Self::Client(_) => "client",
        }
    }
}
