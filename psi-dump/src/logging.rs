//! Logging system with optional file output and log rotation.
//!
//! Console output goes to stderr so that stdout stays free for the JSON
//! record stream. When a log directory is configured, a daily rotated file
//! is written as well, keeping only logs from the last N days.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use chrono::Local;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Base name of the rotated log files.
const LOG_FILE_NAME: &str = "psi-dump.log";

/// Initialize the logging system.
///
/// # Arguments
/// * `log_dir` - Directory where log files will be stored, if any
/// * `retention_days` - Number of days to keep log files
/// * `verbose` - Whether to enable debug-level logging
/// * `level` - Default level from the config file (`RUST_LOG` still wins)
pub fn init_logging(
    log_dir: Option<&Path>,
    retention_days: u64,
    verbose: bool,
    level: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let file_layer = match log_dir {
        Some(log_dir) => {
            fs::create_dir_all(log_dir)?;
            clean_old_logs(log_dir, retention_days)?;

            let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // Keep the worker alive for the program lifetime
            let _ = Box::leak(Box::new(Arc::new(guard)));

            Some(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_ansi(false)
                    .with_timer(LocalTimeTimer),
            )
        }
        None => None,
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(verbose, level)));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(io::stderr).with_timer(LocalTimeTimer))
        .with(file_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to set default subscriber: {}", e))?;

    // Bridge log:: macros (used by psi-demux) to tracing
    tracing_log::LogTracer::init()
        .map_err(|e| format!("Failed to initialize LogTracer: {}", e))?;

    Ok(())
}

/// Default filter when `RUST_LOG` is not set.
fn filter_directive(verbose: bool, level: Option<&str>) -> String {
    if verbose {
        return "debug".to_string();
    }
    match level {
        Some(level) if !level.trim().is_empty() => level.trim().to_lowercase(),
        _ => "info".to_string(),
    }
}

/// Clean up log files older than the specified number of days.
fn clean_old_logs(log_dir: &Path, retention_days: u64) -> io::Result<()> {
    if !log_dir.exists() {
        return Ok(());
    }

    let cutoff = Local::now() - chrono::Duration::days(retention_days as i64);

    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let is_ours = path
            .file_name()
            .and_then(|name| name.to_str())
            .map_or(false, |name| name.contains(LOG_FILE_NAME));
        if !is_ours {
            continue;
        }

        if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
            let modified: chrono::DateTime<Local> = modified.into();
            if modified < cutoff {
                if let Err(e) = fs::remove_file(&path) {
                    eprintln!("Failed to remove old log file {:?}: {}", path, e);
                }
            }
        }
    }

    Ok(())
}

/// Local time formatting for log lines.
#[derive(Debug, Clone, Copy)]
struct LocalTimeTimer;

impl fmt::time::FormatTime for LocalTimeTimer {
    fn format_time(&self, w: &mut fmt::format::Writer) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.6f"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive() {
        assert_eq!(filter_directive(false, None), "info");
        assert_eq!(filter_directive(false, Some(" WARN ")), "warn");
        assert_eq!(filter_directive(false, Some("")), "info");
        assert_eq!(filter_directive(true, Some("error")), "debug");
    }

    #[test]
    fn test_clean_old_logs_keeps_recent_files() {
        let dir = std::env::temp_dir().join(format!("psi-dump-logs-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let recent = dir.join("psi-dump.log.2026-10-19");
        let other = dir.join("unrelated.txt");
        fs::write(&recent, b"x").unwrap();
        fs::write(&other, b"x").unwrap();

        clean_old_logs(&dir, 1).unwrap();
        assert!(recent.exists());
        assert!(other.exists());

        fs::remove_dir_all(&dir).unwrap();
        assert!(clean_old_logs(&dir, 1).is_ok());
    }
}
