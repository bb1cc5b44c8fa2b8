use std::sync::Arc;

use axum::{Json, debug_handler, extract::State};
use axum_extra::extract::WithRejection;
use common::{object::PrefetchReport, query_params::PrefetchBody};
use image_cache::CacheProtocol;
use tokio::time::Instant;
use tracing::debug;

use crate::{ServerState, routes::error_message_erasure::ApiError};

#[debug_handler]
pub(crate) async fn prefetch_handler(
    State(state): State<Arc<ServerState>>,
    WithRejection(Json(body), _): WithRejection<Json<PrefetchBody>, ApiError>,
) -> Result<Json<PrefetchReport>, ApiError> {
    let start_time = Instant::now();
    let options = body.options();

    let report = state.cache.prefetch(body.keys, options).await?;

    debug!("Prefetch time: {}ms", start_time.elapsed().as_millis());

    Ok(Json(report))
}
