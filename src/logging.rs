//! Log output for the server, the stress-test client and worker children.
//!
//! Every line has the shape `<timestamp> - <LEVEL> - <message>`. On the
//! console the whole line is colored by level; the client's log file gets the
//! same line without escape codes.

use anyhow::{Context, Result};
use colored::*;
use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// A tracing event formatter producing `<timestamp> - <LEVEL> - <message>`.
///
/// When `colorize` is set the entire line is colored according to its
/// severity level.
pub struct ColorizedFormatter {
    colorize: bool,
}

impl ColorizedFormatter {
    /// Formatter for terminal output.
    pub fn new() -> Self {
        Self { colorize: true }
    }

    /// Formatter for log files.
    pub fn plain() -> Self {
        Self { colorize: false }
    }
}

impl Default for ColorizedFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, N> FormatEvent<S, N> for ColorizedFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        // format_fields writes directly, so buffer the message to color the whole line.
        let mut message = String::new();
        ctx.format_fields(Writer::new(&mut message), event)?;

        let level = *event.metadata().level();
        let line = format!(
            "{} - {} - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
            level,
            message
        );

        if !self.colorize {
            return writeln!(writer, "{}", line);
        }

        let colored_output = match level {
            Level::INFO => line.white(),
            Level::WARN => line.yellow(),
            Level::ERROR => line.red(),
            Level::DEBUG => line.blue(),
            Level::TRACE => line.purple(),
        };
        writeln!(writer, "{}", colored_output)
    }
}

/// `--debug` wins over `RUST_LOG`; otherwise `RUST_LOG`, falling back to `info`.
fn env_filter(debug: bool) -> EnvFilter {
    if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Console logging for the file server.
pub fn init_server_logging(debug: bool) -> Result<()> {
    tracing_subscriber::registry()
        .with(env_filter(debug))
        .with(tracing_subscriber::fmt::layer().event_format(ColorizedFormatter::new()))
        .try_init()
        .context("Failed to install the log subscriber")
}

/// Console plus log-file output for the stress-test client.
///
/// The file is appended to through a non-blocking writer; the returned guard
/// must be held until the run is over or trailing lines are lost.
pub fn init_client_logging(debug: bool, log_file: &Path) -> Result<WorkerGuard> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("Failed to open log file {:?}", log_file))?;
    let (file_writer, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::registry()
        .with(env_filter(debug))
        .with(tracing_subscriber::fmt::layer().event_format(ColorizedFormatter::new()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .event_format(ColorizedFormatter::plain()),
        )
        .try_init()
        .context("Failed to install the log subscriber")?;

    Ok(guard)
}

/// Logging for a worker child process: stderr only, stdout carries the result.
pub fn init_worker_logging(debug: bool) -> Result<()> {
    tracing_subscriber::registry()
        .with(env_filter(debug))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .event_format(ColorizedFormatter::plain()),
        )
        .try_init()
        .context("Failed to install the log subscriber")
}
