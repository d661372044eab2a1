//! Common command-line arguments
//!
//! Services flatten [`ServiceArgs`] into their own argument struct.

#[cfg(feature = "cli")]
use clap::Parser;

/// Service startup arguments shared by every binary
#[derive(Debug, Clone)]
#[cfg_attr(feature = "cli", derive(Parser))]
#[cfg_attr(feature = "cli", clap(author, version, about))]
pub struct ServiceArgs {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[cfg_attr(
        feature = "cli",
        clap(short = 'l', long, default_value = "info", env = "RUST_LOG")
    )]
    pub log_level: String,

    /// Disable colored console output
    #[cfg_attr(feature = "cli", clap(long))]
    pub no_color: bool,

    /// Only validate configuration without starting the service
    #[cfg_attr(feature = "cli", clap(long))]
    pub validate: bool,

    /// Archive database path override
    #[cfg_attr(feature = "cli", clap(long, env = "DB_PATH"))]
    pub db_path: Option<String>,
}

impl Default for ServiceArgs {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            no_color: false,
            validate: false,
            db_path: None,
        }
    }
}

impl ServiceArgs {
    /// Parse the level part of `log_level`
    pub fn parse_log_level(&self) -> tracing::Level {
        let head = self
            .log_level
            .split(',')
            .next()
            .unwrap_or_default()
            .to_lowercase();
        match head.as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" | "warning" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }

    /// Database path: CLI override, then the configured value
    pub fn db_path_or(&self, configured: &str) -> String {
        self.db_path
            .clone()
            .unwrap_or_else(|| configured.to_string())
    }
}
