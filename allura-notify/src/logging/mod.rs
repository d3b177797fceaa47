//! Tracing setup for the pipeline binary.
//!
//! Console and daily file output share one filter that can be swapped at
//! runtime. Dated log files past the retention window are removed by a
//! background task.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

use crate::{Error, Result};

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_LOG_FILTER: &str = "allura_notify=info,reqwest=warn";

const LOG_FILE_PREFIX: &str = "allura-notify.log";

const RETENTION_DAYS: i64 = 7;

const RETENTION_SWEEP: Duration = Duration::from_secs(24 * 60 * 60);

/// Local wall-clock timestamps with millisecond precision.
#[derive(Debug, Clone, Copy, Default)]
struct LocalTime;

impl FormatTime for LocalTime {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Live handle on the installed subscriber.
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    log_dir: PathBuf,
}

impl LogHandle {
    /// Current filter directives.
    pub fn filter(&self) -> String {
        self.filter
            .with_current(|current| current.to_string())
            .unwrap_or_default()
    }

    /// Swap the filter, e.g. to `allura_notify=debug` while chasing a stuck mailbox.
    pub fn set_filter(&self, directives: &str) -> Result<()> {
        let filter = EnvFilter::try_new(directives)
            .map_err(|e| Error::config(format!("invalid log filter '{}': {}", directives, e)))?;
        self.filter
            .reload(filter)
            .map_err(|e| Error::Other(format!("log filter reload failed: {}", e)))?;
        info!(filter = %directives, "Log filter changed");
        Ok(())
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Prune old log files once a day until `cancel` fires.
    pub fn spawn_retention(self: &Arc<Self>, cancel: CancellationToken) {
        let log_dir = self.log_dir.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RETENTION_SWEEP);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match prune_logs(&log_dir, RETENTION_DAYS, Utc::now()).await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "Pruned old log files"),
                    Err(e) => warn!(dir = %log_dir.display(), "Log pruning failed: {}", e),
                }
            }
            debug!("Log retention task stopped");
        });
    }
}

/// Date encoded in a rolled file name such as `allura-notify.log.2026-03-19`.
fn rolled_file_date(file_name: &str) -> Option<NaiveDate> {
    let date = file_name
        .strip_prefix(LOG_FILE_PREFIX)?
        .strip_prefix('.')?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Remove rolled files dated before `now - retention_days`.
async fn prune_logs(dir: &Path, retention_days: i64, now: DateTime<Utc>) -> std::io::Result<usize> {
    let cutoff = (now - chrono::Duration::days(retention_days)).date_naive();
    let mut removed = 0;

    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(date) = name.to_str().and_then(rolled_file_date) else {
            continue;
        };
        if date >= cutoff {
            continue;
        }
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) => warn!(file = ?name, "Could not remove old log file: {}", e),
        }
    }
    Ok(removed)
}

/// Install the global subscriber writing to stdout and `log_dir`.
///
/// The guard flushes the file writer on drop; hold it until exit.
pub fn init_logging(log_dir: &str) -> Result<(Arc<LogHandle>, WorkerGuard)> {
    let log_dir = PathBuf::from(log_dir);
    std::fs::create_dir_all(&log_dir)?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX));

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (filter, reload_handle) = reload::Layer::new(filter);

    let console = fmt::layer().with_timer(LocalTime);
    let file = fmt::layer()
        .with_ansi(false)
        .with_timer(LocalTime)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| Error::Other(format!("tracing already initialised: {}", e)))?;

    Ok((
        Arc::new(LogHandle {
            filter: reload_handle,
            log_dir,
        }),
        guard,
    ))
}
