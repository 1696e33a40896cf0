//! HTTP handlers.

use std::net::SocketAddr;

use axum::{
    Json,
    extract::{ConnectInfo, State},
};
use peerchat_protocol::HistoryResponse;
use tracing::{debug, info};

use super::error::{ApiError, ApiResult};
use super::rate_limit::RateDecision;
use super::state::AppState;

/// Serve the local history.
///
/// GET /history
///
/// Callers are identified by the connection's source address, never by
/// anything in the request.
pub async fn get_history(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> ApiResult<Json<HistoryResponse>> {
    let caller = addr.ip().to_canonical();

    match state.limiter.check(caller) {
        RateDecision::Allowed { remaining } => {
            debug!("history request from {} ({} left in window)", caller, remaining);
        }
        RateDecision::Limited { retry_after } => {
            return Err(ApiError::too_many_requests(
                state.limiter.limit(),
                state.limiter.window(),
                retry_after,
            ));
        }
    }

    let history = state.store.load().await;
    match &history {
        Some(log) => info!("Serving {} messages to {}", log.len(), caller),
        None => info!("No history to serve to {}", caller),
    }

    Ok(Json(HistoryResponse::from(history)))
}
