//! Acquisition Service binary
//!
//! Loads the device configuration, opens the SQLite archive, connects the
//! devices and runs the tick scheduler until Ctrl+C or SIGTERM.

use acqsrv::archive::ArchiveBackend;
use acqsrv::config::{AcqConfig, DEFAULT_CONFIG_PATH};
use acqsrv::runtime::Gateway;
use anyhow::Context;
use clap::Parser;
use common::logging::{self, LogConfig};
use common::sqlite::SqliteClient;
use common::ServiceArgs;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Daily log files older than this are gzipped
const LOG_COMPRESS_AFTER_DAYS: u64 = 7;

#[derive(Debug, Parser)]
#[command(name = "acqsrv", about = "Data acquisition service")]
struct Args {
    /// YAML configuration file
    #[arg(short = 'c', long, env = "ACQSRV_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(flatten)]
    service: ServiceArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Config not loaded yet: log root comes from ACQSRV_LOG_DIR or logs/
    let log_dir = logging::init_log_root(None);
    logging::init_with_config(LogConfig {
        log_dir: log_dir.clone(),
        level: args.service.parse_log_level(),
        ansi: !args.service.no_color,
        ..LogConfig::default()
    })
    .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
    logging::enable_sighup_log_reopen();
    logging::start_log_compression_task(log_dir, "acqsrv".to_string(), LOG_COMPRESS_AFTER_DAYS);

    info!("Starting acqsrv v{}", env!("CARGO_PKG_VERSION"));

    let config = AcqConfig::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;
    if let Some(level) = &config.logging.level {
        if let Err(e) = logging::set_log_level(level) {
            warn!("Ignoring configured log level: {}", e);
        }
    }
    debug!("Log level: {}", logging::get_log_level());

    // Validation mode: build every device without storage and exit
    if args.service.validate {
        let gateway = Gateway::build(&config, None).await?;
        for payload in gateway.snapshot().await {
            info!(
                "Device {} valid: {} variables, {} calculation elements",
                payload.id,
                payload.variables.len(),
                payload.calculation_elements.len()
            );
        }
        info!("Validation completed successfully");
        return Ok(());
    }

    let db_path = args.service.db_path_or(&config.archive.path);
    let sqlite = SqliteClient::new(&db_path)
        .await
        .with_context(|| format!("Failed to open archive database {}", db_path))?;
    let backend = ArchiveBackend::Sqlite {
        pool: sqlite.pool().clone(),
        layout: config.archive.layout,
    };

    let gateway = Gateway::build(&config, Some(backend)).await?;
    let active = gateway.connect_all().await;
    info!("{}/{} devices active", active, gateway.len());

    let mut events = gateway.subscribe();
    let event_logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!(
                    device = %event.device_id,
                    tick = event.tick,
                    "Refreshed: {} variables, {} elements changed",
                    event.changed.len(),
                    event.changed_elements.len()
                ),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event logger lagged, {} events skipped", skipped)
                },
                Err(RecvError::Closed) => break,
            }
        }
    });

    let scheduler = gateway.start(&config.scheduler);

    let signal = common::shutdown::wait_for_shutdown().await;
    info!("{} received, shutting down", signal);

    scheduler.stop().await;
    gateway.shutdown().await;
    event_logger.abort();
    sqlite.close().await;

    info!("acqsrv stopped");
    Ok(())
}
