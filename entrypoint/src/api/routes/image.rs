use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    debug_handler,
    extract::{Query, State},
    http::{HeaderMap, HeaderName, StatusCode, header},
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use common::{
    object::CachedObject,
    options::CacheOptions,
    query_params::{FetchParams, KeyParams},
};
use image_cache::CacheProtocol;

use crate::{ServerState, routes::error_message_erasure::ApiError};

const FALLBACK_MIME_TYPE: &str = "application/octet-stream";
static CACHE_STATUS: HeaderName = HeaderName::from_static("x-cache");

#[debug_handler]
pub(crate) async fn fetch_handler(
    State(state): State<Arc<ServerState>>,
    WithRejection(Query(params), _): WithRejection<Query<FetchParams>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let fetched = state.cache.fetch(&params.key, params.options()).await?;

    let mime_type = fetched
        .object
        .mime_type
        .unwrap_or(FALLBACK_MIME_TYPE.into());

    let cache_status = match fetched.from_cache {
        true => "hit",
        false => "miss",
    };

    let headers = [
        (header::CONTENT_TYPE, mime_type),
        (CACHE_STATUS.clone(), cache_status.to_string()),
    ];

    Ok((headers, Body::from(fetched.object.data)))
}

#[debug_handler]
pub(crate) async fn store_handler(
    State(state): State<Arc<ServerState>>,
    WithRejection(Query(params), _): WithRejection<Query<KeyParams>, ApiError>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let mut object = CachedObject::new(body.to_vec());

    if let Some(mime_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
    {
        object = object.with_mime_type(mime_type);
    }

    state
        .cache
        .store(&params.key, object, CacheOptions::new())
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler]
pub(crate) async fn remove_handler(
    State(state): State<Arc<ServerState>>,
    WithRejection(Query(params), _): WithRejection<Query<KeyParams>, ApiError>,
) -> Result<StatusCode, ApiError> {
    state.cache.remove(&params.key).await?;

    Ok(StatusCode::NO_CONTENT)
}
