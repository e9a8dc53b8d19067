//! Tracing setup: stdout plus a daily-rolling file under `./logs`, both
//! using [`crate::log_format::TextWithSpanIds`] so file and stdout lines
//! carry the same `trace_id`/`span_id` prefix.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::log_format::TextWithSpanIds;

/// Installs the global subscriber. Safe to call once per process; a second
/// call (e.g. in tests) is a no-op handled by `tracing`'s own guard.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_appender = tracing_appender::rolling::daily("logs", "orchestrator.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    // Leaked intentionally: the guard must outlive the process for the
    // background flush thread to keep running, and this runs once at
    // startup for the lifetime of the binary.
    std::mem::forget(guard);

    let stdout_layer = fmt::layer().event_format(TextWithSpanIds::new());
    let file_layer = fmt::layer()
        .event_format(TextWithSpanIds::new())
        .with_writer(file_writer)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    Ok(())
}
