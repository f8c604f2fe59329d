//! Tracing configuration and log routing.
//!
//! Stdout gets a compact formatter. A file layer mirrors everything and additionally records
//! when the `ingest`, `document`, and `query` spans close, so each upload leaves one timing line
//! per document plus one for the whole request, tagged with its `ingest_id`.
//!
//! `DOCVEC_LOG_FILE` appends to a fixed path; otherwise the file rolls daily under `logs/`.
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const LOG_FILE_VAR: &str = "DOCVEC_LOG_FILE";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_PREFIX: &str = "docvec.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Where the file layer writes.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LogDestination {
    /// Append to one explicit file.
    File(PathBuf),
    /// Daily-rolled files `<prefix>.<date>` inside `directory`.
    Daily { directory: PathBuf, prefix: String },
}

fn log_destination<F>(lookup: F) -> LogDestination
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(LOG_FILE_VAR).filter(|value| !value.trim().is_empty()) {
        Some(path) => LogDestination::File(PathBuf::from(path.trim())),
        None => LogDestination::Daily {
            directory: PathBuf::from(DEFAULT_LOG_DIR),
            prefix: DEFAULT_LOG_PREFIX.to_string(),
        },
    }
}

/// Configure tracing subscribers for stdout and file logging.
///
/// - Respects `RUST_LOG` for filtering (defaults to `info`).
/// - Keeps the non-blocking writer guard alive for the process lifetime.
/// - Calling it twice is harmless; the second installation attempt is ignored.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false).compact();
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    let destination = log_destination(|key| std::env::var(key).ok());
    match open_writer(&destination) {
        Some(writer) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .with_span_events(FmtSpan::CLOSE)
                .compact();
            let _ = registry.with(file_layer).try_init();
        }
        None => {
            let _ = registry.try_init();
        }
    }
}

fn open_writer(destination: &LogDestination) -> Option<NonBlocking> {
    let (writer, guard) = match destination {
        LogDestination::File(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| eprintln!("Failed to open log file {}: {err}", path.display()))
                .ok()?;
            tracing_appender::non_blocking(file)
        }
        LogDestination::Daily { directory, prefix } => {
            std::fs::create_dir_all(directory)
                .map_err(|err| {
                    eprintln!("Failed to create log directory {}: {err}", directory.display())
                })
                .ok()?;
            tracing_appender::non_blocking(tracing_appender::rolling::daily(directory, prefix))
        }
    };
    let _ = LOG_GUARD.set(guard);
    Some(writer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_log_file_wins() {
        let destination = log_destination(|key| {
            (key == LOG_FILE_VAR).then(|| " /var/log/docvec/ingest.log ".to_string())
        });
        assert_eq!(
            destination,
            LogDestination::File(PathBuf::from("/var/log/docvec/ingest.log"))
        );
    }

    #[test]
    fn blank_or_missing_variable_rolls_daily_under_logs() {
        let expected = LogDestination::Daily {
            directory: PathBuf::from("logs"),
            prefix: "docvec.log".into(),
        };
        assert_eq!(log_destination(|_| None), expected);
        assert_eq!(log_destination(|_| Some("   ".into())), expected);
    }

    #[test]
    fn explicit_file_is_created_on_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("docvec.log");
        assert!(open_writer(&LogDestination::File(path.clone())).is_some());
        assert!(path.exists());
    }
}
