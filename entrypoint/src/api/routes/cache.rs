use std::sync::Arc;

use axum::{debug_handler, extract::State, http::StatusCode};
use image_cache::CacheProtocol;

use crate::{ServerState, routes::error_message_erasure::ApiError};

#[debug_handler]
pub(crate) async fn clear_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<StatusCode, ApiError> {
    state.cache.clear().await?;

    Ok(StatusCode::NO_CONTENT)
}
