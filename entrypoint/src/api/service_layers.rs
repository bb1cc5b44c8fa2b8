use std::{env, sync::LazyLock};

use axum::http::{
    HeaderValue, Method,
    header::{CONTENT_TYPE, InvalidHeaderValue},
};
use tower::{
    ServiceBuilder,
    layer::util::{Identity, Stack},
};
use tower_http::cors::CorsLayer;

static ALLOWED_ORIGIN: LazyLock<String> = LazyLock::new(|| {
    env::var("API_CORS_ORIGIN").unwrap_or("http://localhost:3000".into())
});

pub(crate) fn build_service_layers()
-> Result<ServiceBuilder<Stack<CorsLayer, Identity>>, InvalidHeaderValue> {
    let cors_layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::PUT, Method::DELETE, Method::POST])
        .allow_headers([CONTENT_TYPE])
        .allow_origin(ALLOWED_ORIGIN.parse::<HeaderValue>()?);

    Ok(ServiceBuilder::new().layer(cors_layer))
}
