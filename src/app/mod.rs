pub mod config;
pub mod logging_system;
pub mod service;
pub mod shutdown;

pub use config::{ConfigError, LogFormat, LogLevel, RelayConfig, StorageKind};
pub use logging_system::{LoggingError, setup_logging_safe};
pub use service::{RelayService, RunSummary, ServiceError, StopCause};
pub use shutdown::shutdown_signal;

use tokio::io::BufReader;
use tracing::info;

pub struct App {
    service: RelayService,
}

impl App {
    pub async fn from_args<I, T>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = RelayConfig::from_args(args)?;
        Self::from_config(config).await
    }

    pub async fn from_config(config: RelayConfig) -> anyhow::Result<Self> {
        setup_logging_safe(config.log_level, config.log_format)?;

        info!("Starting event-relay v{}", crate::VERSION);
        info!(
            "Configuration: base_url={}, endpoint={}, flush_interval={:?}, storage={:?} at {}",
            config.base_url,
            config.endpoint,
            config.flush_interval,
            config.storage_backend,
            config.storage_dir.display()
        );

        let service = RelayService::new(config).await?;
        Ok(Self { service })
    }

    /// Relay stdin until it ends or a shutdown signal arrives.
    pub async fn run(self) -> anyhow::Result<RunSummary> {
        let stdin = BufReader::new(tokio::io::stdin());
        let summary = self.service.run(stdin, shutdown_signal()).await?;

        info!(
            "event-relay stopped: {} accepted, {} invalid, {} persisted for next run, {} lost",
            summary.accepted, summary.invalid, summary.shutdown.persisted, summary.shutdown.lost
        );
        Ok(summary)
    }
}

// Main entry point for the application
pub async fn main() -> anyhow::Result<()> {
    let app = App::from_args(std::env::args_os()).await?;
    app.run().await?;
    Ok(())
}
