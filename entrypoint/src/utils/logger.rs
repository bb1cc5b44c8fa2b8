use thiserror::Error;
use tracing::{dispatcher::SetGlobalDefaultError, level_filters::LevelFilter};
use tracing_subscriber::{EnvFilter, FmtSubscriber, filter::FromEnvError};

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Failed to create tracing filter")]
    Filter(#[from] FromEnvError),
    #[error("Failed to create log subscription")]
    Subscriber(#[from] SetGlobalDefaultError),
}

/// Compact formatter filtered by `RUST_LOG`, `INFO` when unset
pub fn configure_logger() -> Result<(), LoggerError> {
    let env_log = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;

    let subscriber = FmtSubscriber::builder()
        .pretty()
        .compact()
        .with_file(false)
        .with_env_filter(env_log);

    tracing::subscriber::set_global_default(subscriber.finish())?;

    Ok(())
}
