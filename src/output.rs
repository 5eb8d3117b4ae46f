use std::io::{self, Write};

use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::catalog::RegionCatalog;
use crate::census::CensusReport;
use crate::etl::{ProgressEvent, ProgressSink};
use crate::source::DataSource;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    /// Progress events are logged as they happen.
    Verbose,
    Quiet,
}

impl OutputMode {
    /// Default log level when `RUST_LOG` is unset.
    pub fn default_log_directive(self) -> &'static str {
        match self {
            OutputMode::Verbose => "info",
            OutputMode::Quiet => "warn",
        }
    }
}

/// `RUST_LOG` when set and valid, otherwise the mode's default level.
pub fn log_filter(mode: OutputMode) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(mode.default_log_directive()))
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &CensusReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_sources(sources: &[DataSource]) -> io::Result<()> {
        Self::print_json(&sources)
    }

    pub fn print_regions(catalog: &RegionCatalog) -> io::Result<()> {
        Self::print_json(&catalog.codes())
    }

    fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress events to the tracing subscriber.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

pub fn progress_sink(mode: OutputMode) -> &'static dyn ProgressSink {
    match mode {
        OutputMode::Verbose => &LogProgress,
        OutputMode::Quiet => &JsonOutput,
    }
}
