//! HTTP API module.
//!
//! Serves the local history to other peers at `GET /history`, rate limited
//! per caller address.

mod error;
pub mod handlers;
mod rate_limit;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use rate_limit::{RateDecision, RateLimiter};
pub use routes::create_router;
pub use state::{AppState, ServerConfig};
