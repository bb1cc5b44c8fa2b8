mod routes;
mod service_layers;

use std::{
    env,
    error::Error,
    sync::{Arc, LazyLock},
    time::Duration,
};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};
use clap::Parser;
use common::config::WorkerConfig;
use fetcher::FetcherConfig;
use image_cache::{CacheWorker, HttpOrigin, MemoryCache};
use mimalloc::MiMalloc;
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use utils::logger::configure_logger;

use crate::{
    routes::{cache, image, prefetch},
    service_layers::build_service_layers,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

static API_HOST: LazyLock<String> =
    LazyLock::new(|| env::var("API_HOST").unwrap_or("0.0.0.0".into()));

static API_PORT: LazyLock<u16> = LazyLock::new(|| {
    env::var("API_PORT")
        .ok()
        .and_then(|port| port.parse().ok())
        .unwrap_or(8080)
});

#[derive(Parser, Debug)]
#[command(version, about = "Caching HTTP front-end for remote images")]
struct Args {
    /// Overrides API_PORT
    #[arg(long)]
    port: Option<u16>,
    /// Payload bytes kept in memory before entries get evicted
    #[arg(long, default_value_t = 512)]
    max_memory_mb: u64,
    /// 0 keeps entries until they are evicted
    #[arg(long, default_value_t = 3_600)]
    ttl_secs: u64,
    /// Only serve what was uploaded, never download on a miss
    #[arg(long)]
    no_origin: bool,
}

pub(crate) struct ServerState {
    pub(crate) cache: CacheWorker,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    configure_logger()?;

    let args = Args::parse();

    metrics::init();

    let config = WorkerConfig::from_env();
    let body_limit = config.max_payload_bytes;

    let max_bytes = args.max_memory_mb.saturating_mul(1024 * 1024);
    let mut engine = MemoryCache::builder().max_bytes(max_bytes);

    if args.ttl_secs > 0 {
        engine = engine.time_to_live(Duration::from_secs(args.ttl_secs));
    }

    let mut engine = engine.build();

    if !args.no_origin {
        let fetcher_config = FetcherConfig {
            max_body_bytes: body_limit,
            ..FetcherConfig::default()
        };

        engine = engine.with_origin(Arc::new(HttpOrigin::new(fetcher_config)?));
    }

    let engine = Arc::new(engine);
    let cache_worker = CacheWorker::builder(engine.clone()).config(config).build();

    let state = Arc::new(ServerState {
        cache: cache_worker.clone(),
    });

    let app = Router::new()
        .route(
            "/image",
            get(image::fetch_handler)
                .put(image::store_handler)
                .delete(image::remove_handler),
        )
        .route("/cache", delete(cache::clear_handler))
        .route("/prefetch", post(prefetch::prefetch_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(build_service_layers()?)
        .with_state(state);

    let address = format!("{}:{}", API_HOST.as_str(), args.port.unwrap_or(*API_PORT));
    let listener = TcpListener::bind(&address).await?;

    info!("Listening on {}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cache_worker.shutdown();

    info!(
        "Memory cache held {} entries, {} bytes",
        engine.len().await,
        engine.size_in_bytes().await
    );

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c, running until killed: {err}");
        std::future::pending::<()>().await;
    }

    info!("Shutting down");
}
