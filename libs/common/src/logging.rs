//! Logging bootstrap
//!
//! Console output plus a daily rolling file `{YYYYMMDD}_{service}.log`
//! (size-rotated within a day to `{YYYYMMDD}_{service}.N.log`). Both share
//! the `timestamp [LEVEL] message` format and one reloadable `EnvFilter`,
//! so the level can be changed while the service runs.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields, MakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    reload,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Environment override for the log directory
pub const LOG_DIR_ENV: &str = "ACQSRV_LOG_DIR";

/// Default max file size: 100MB
const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Event formatter: `2025-12-02T00:50:44.809123Z [INFO] message key=value`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m",
                Level::DEBUG => "\x1b[34m",
                Level::INFO => "\x1b[32m",
                Level::WARN => "\x1b[33m",
                Level::ERROR => "\x1b[31m",
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

// ============================================================================
// Log root
// ============================================================================

static LOG_ROOT: OnceLock<PathBuf> = OnceLock::new();

/// Fix the log root once.
///
/// Priority: `ACQSRV_LOG_DIR` > `config_dir` > `logs`
pub fn init_log_root(config_dir: Option<&str>) -> PathBuf {
    LOG_ROOT
        .get_or_init(|| {
            std::env::var(LOG_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(config_dir.unwrap_or("logs")))
        })
        .clone()
}

pub fn get_log_root() -> PathBuf {
    LOG_ROOT.get().cloned().unwrap_or_else(|| {
        std::env::var(LOG_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("logs"))
    })
}

// ============================================================================
// Daily rolling writer
// ============================================================================

struct RollingState {
    date: String,
    file: File,
    size: u64,
    rotation: u32,
}

/// File writer that starts a new file every day and whenever the current
/// file would exceed `max_file_size`
#[derive(Clone)]
struct DailyRollingWriter {
    service_name: String,
    log_dir: PathBuf,
    max_file_size: u64,
    state: Arc<Mutex<RollingState>>,
}

impl DailyRollingWriter {
    fn new(service_name: String, log_dir: PathBuf, max_file_size: u64) -> std::io::Result<Self> {
        fs::create_dir_all(&log_dir)?;
        let date = today();
        let file = open_append(&log_file_path(&log_dir, &date, &service_name, 0))?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            service_name,
            log_dir,
            max_file_size,
            state: Arc::new(Mutex::new(RollingState {
                date,
                file,
                size,
                rotation: 0,
            })),
        })
    }

    fn path_for(&self, state: &RollingState) -> PathBuf {
        log_file_path(&self.log_dir, &state.date, &self.service_name, state.rotation)
    }

    fn roll_if_needed(&self, state: &mut RollingState, incoming: usize) -> std::io::Result<()> {
        let date = today();
        let current = self.path_for(state);

        if date != state.date || !current.exists() {
            // New day, or the file was removed underneath us
            if date != state.date {
                state.date = date;
                state.rotation = 0;
            }
            fs::create_dir_all(&self.log_dir)?;
            let path = self.path_for(state);
            state.file = open_append(&path)?;
            state.size = state.file.metadata().map(|m| m.len()).unwrap_or(0);
        }

        if state.size > 0 && state.size + incoming as u64 > self.max_file_size {
            state.rotation += 1;
            let path = self.path_for(state);
            state.file = open_append(&path)?;
            state.size = 0;
        }
        Ok(())
    }
}

impl Write for DailyRollingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut state = self.state.lock();
        self.roll_if_needed(&mut state, buf.len())?;
        let written = state.file.write(buf)?;
        state.size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.state.lock().file.flush()
    }
}

fn today() -> String {
    chrono::Local::now().format("%Y%m%d").to_string()
}

fn log_file_path(log_dir: &Path, date: &str, service_name: &str, rotation: u32) -> PathBuf {
    if rotation == 0 {
        log_dir.join(format!("{}_{}.log", date, service_name))
    } else {
        log_dir.join(format!("{}_{}.{}.log", date, service_name, rotation))
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

// ============================================================================
// Reloadable file writer
// ============================================================================

/// Non-blocking writer that can be swapped after a reopen
#[derive(Clone)]
struct ReloadableWriter {
    inner: Arc<Mutex<NonBlocking>>,
}

impl ReloadableWriter {
    fn reload(&self, writer: NonBlocking) {
        *self.inner.lock() = writer;
    }
}

impl Write for ReloadableWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.lock().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.lock().flush()
    }
}

impl MakeWriter<'_> for ReloadableWriter {
    type Writer = Self;

    fn make_writer(&self) -> Self::Writer {
        self.clone()
    }
}

// ============================================================================
// Global state
// ============================================================================

struct LogRuntime {
    config: LogConfig,
    writer: ReloadableWriter,
    guard: WorkerGuard,
}

type EnvFilterReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

static LOG_RUNTIME: OnceLock<Mutex<LogRuntime>> = OnceLock::new();
static LOG_FILTER_HANDLE: OnceLock<EnvFilterReloadHandle> = OnceLock::new();
static CURRENT_LOG_LEVEL: OnceLock<Mutex<String>> = OnceLock::new();

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name, used for the file name and the default filter
    pub service_name: String,
    pub log_dir: PathBuf,
    /// Global level of the default filter (ignored when `RUST_LOG` is set)
    pub level: Level,
    pub ansi: bool,
    pub max_file_size: u64,
    /// Days before a log file is gzipped
    pub compress_after_days: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "acqsrv".to_string(),
            log_dir: get_log_root(),
            level: Level::INFO,
            ansi: true,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            compress_after_days: 7,
        }
    }
}

/// Default filter: `<level>,<service>=debug` unless `RUST_LOG` is set
fn initial_filter(config: &LogConfig) -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| {
        format!(
            "{},{}=debug",
            config.level.as_str().to_lowercase(),
            config.service_name
        )
    })
}

/// Install the global subscriber. Must be called inside a tokio runtime.
pub fn init_with_config(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let file_writer = DailyRollingWriter::new(
        config.service_name.clone(),
        config.log_dir.clone(),
        config.max_file_size,
    )?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_writer);
    let writer = ReloadableWriter {
        inner: Arc::new(Mutex::new(non_blocking)),
    };

    let filter_str = initial_filter(&config);
    let (reload_filter, reload_handle) = reload::Layer::new(EnvFilter::try_new(&filter_str)?);
    let _ = LOG_FILTER_HANDLE.set(reload_handle);
    let _ = CURRENT_LOG_LEVEL.set(Mutex::new(filter_str));

    let console_layer = fmt::layer()
        .with_ansi(config.ansi)
        .event_format(BracketedLevelFormat)
        .boxed();

    let file_layer = fmt::layer()
        .with_writer(writer.clone())
        .with_ansi(false)
        .event_format(BracketedLevelFormat)
        .boxed();

    tracing_subscriber::registry()
        .with(reload_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!("Logging: {} @ {:?}", config.service_name, config.log_dir);
    start_log_compression_task(
        config.log_dir.clone(),
        config.service_name.clone(),
        config.compress_after_days,
    );

    let runtime = LogRuntime {
        config,
        writer,
        guard,
    };
    // try_init above only succeeds once per process, so this slot is empty
    let _ = LOG_RUNTIME.set(Mutex::new(runtime));

    Ok(())
}

/// Reopen the log file (after external rotation or deletion)
pub fn reopen_logs_now() -> Result<(), Box<dyn std::error::Error>> {
    let runtime = LOG_RUNTIME.get().ok_or("logging not initialized")?;
    let mut runtime = runtime.lock();

    let file_writer = DailyRollingWriter::new(
        runtime.config.service_name.clone(),
        runtime.config.log_dir.clone(),
        runtime.config.max_file_size,
    )?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_writer);
    runtime.writer.reload(non_blocking);
    // Dropping the old guard flushes and closes the previous handle
    runtime.guard = guard;
    Ok(())
}

/// Reopen logs on SIGHUP (Unix only)
pub fn enable_sighup_log_reopen() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        tokio::spawn(async move {
            match signal(SignalKind::hangup()) {
                Ok(mut hup) => loop {
                    hup.recv().await;
                    if let Err(e) = reopen_logs_now() {
                        tracing::warn!("SIGHUP reopen: {}", e);
                    }
                },
                Err(e) => tracing::warn!("SIGHUP handler: {}", e),
            }
        });
    }
}

/// Replace the active filter, e.g. `debug` or `info,acqsrv=trace`
pub fn set_log_level(level: &str) -> Result<(), String> {
    let handle = LOG_FILTER_HANDLE
        .get()
        .ok_or("Logging not initialized with reload support")?;

    let new_filter =
        EnvFilter::try_new(level).map_err(|e| format!("Invalid log level '{}': {}", level, e))?;
    handle
        .reload(new_filter)
        .map_err(|e| format!("Failed to reload log filter: {}", e))?;

    if let Some(current) = CURRENT_LOG_LEVEL.get() {
        *current.lock() = level.to_string();
    }

    tracing::info!("Log level changed to: {}", level);
    Ok(())
}

pub fn get_log_level() -> String {
    CURRENT_LOG_LEVEL
        .get()
        .map(|m| m.lock().clone())
        .unwrap_or_else(|| "unknown".to_string())
}

// ==================== Log Compression ====================

/// Gzip old log files once a day
pub fn start_log_compression_task(log_dir: PathBuf, service_name: String, after_days: u64) {
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(86400));

        loop {
            interval.tick().await;
            if let Err(e) = compress_old_logs(&log_dir, &service_name, after_days).await {
                tracing::error!("Log compression error for {}: {}", service_name, e);
            }
        }
    });
}

async fn compress_old_logs(
    log_dir: &Path,
    service_name: &str,
    after_days: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    use std::time::{Duration, SystemTime};

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        if !file_name.contains(&format!("_{}", service_name)) || !file_name.ends_with(".log") {
            continue;
        }

        let modified = tokio::fs::metadata(&path).await?.modified()?;
        let age = SystemTime::now().duration_since(modified)?;
        if age > Duration::from_secs(after_days * 86400) {
            let source = path.clone();
            tokio::task::spawn_blocking(move || compress_file(&source)).await??;
            tokio::fs::remove_file(&path).await?;
            tracing::debug!("Compressed: {}", file_name);
        }
    }
    Ok(())
}

fn compress_file(path: &Path) -> std::io::Result<()> {
    let data = fs::read(path)?;
    let output = File::create(format!("{}.gz", path.display()))?;
    let mut encoder = GzEncoder::new(output, Compression::best());
    encoder.write_all(&data)?;
    encoder.finish()?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_daily_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            DailyRollingWriter::new("acqsrv".into(), dir.path().to_path_buf(), 1024).unwrap();
        writer.write_all(b"hello\n").unwrap();
        writer.flush().unwrap();

        let expected = dir.path().join(format!("{}_acqsrv.log", today()));
        assert_eq!(fs::read_to_string(expected).unwrap(), "hello\n");
    }

    #[test]
    fn test_size_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            DailyRollingWriter::new("acqsrv".into(), dir.path().to_path_buf(), 8).unwrap();
        writer.write_all(b"12345\n").unwrap();
        writer.write_all(b"abcdef\n").unwrap();
        writer.flush().unwrap();

        let rotated = dir.path().join(format!("{}_acqsrv.1.log", today()));
        assert_eq!(fs::read_to_string(rotated).unwrap(), "abcdef\n");
    }

    #[test]
    fn test_recreates_deleted_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            DailyRollingWriter::new("acqsrv".into(), dir.path().to_path_buf(), 1024).unwrap();
        let path = dir.path().join(format!("{}_acqsrv.log", today()));

        writer.write_all(b"first\n").unwrap();
        fs::remove_file(&path).unwrap();
        writer.write_all(b"second\n").unwrap();
        writer.flush().unwrap();

        assert_eq!(fs::read_to_string(path).unwrap(), "second\n");
    }

    #[test]
    fn test_compress_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("20240101_acqsrv.log");
        fs::write(&path, "old line\n").unwrap();

        compress_file(&path).unwrap();

        let gz = File::open(dir.path().join("20240101_acqsrv.log.gz")).unwrap();
        let mut decoder = flate2::read::GzDecoder::new(gz);
        let mut text = String::new();
        decoder.read_to_string(&mut text).unwrap();
        assert_eq!(text, "old line\n");
    }

    #[test]
    fn test_initial_filter_uses_service_name() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LogConfig {
            level: Level::WARN,
            ..Default::default()
        };
        assert_eq!(initial_filter(&config), "warn,acqsrv=debug");
    }
}
