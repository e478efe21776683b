//! Logging setup: stderr output plus a SQLite table of warnings and errors
//! that the CLI can query after the fact.

mod logging;

pub use logging::{LogQuery, LogRecord, SqliteLogLayer, SqliteLogSink};

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{Level, Subscriber};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Used when `RUST_LOG` is unset.
    pub log_level: Level,
    /// Extra directives such as `("ats_realtime", DEBUG)`.
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines on stderr instead of compact text.
    pub json: bool,
    pub log_to_sqlite: bool,
    pub log_db_path: PathBuf,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"));
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
            log_to_sqlite: true,
            log_db_path: home.join(".ats-feedback").join("logs.db"),
        }
    }
}

impl TelemetryConfig {
    fn directives(&self) -> String {
        std::iter::once(self.log_level.as_str().to_lowercase())
            .chain(
                self.module_levels
                    .iter()
                    .map(|(module, level)| format!("{module}={}", level.as_str().to_lowercase())),
            )
            .collect::<Vec<_>>()
            .join(",")
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directives()))
    }
}

/// Returned by [`init_telemetry`]; holds the log sink when one was opened.
pub struct TelemetryGuard {
    log_sink: Option<Arc<SqliteLogSink>>,
}

impl TelemetryGuard {
    pub fn logs(&self) -> Option<&SqliteLogSink> {
        self.log_sink.as_deref()
    }
}

fn stderr_layer<S>(config: &TelemetryConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    // stdout is reserved for command output
    let fmt = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);
    if config.json {
        fmt.json()
            .with_span_list(true)
            .with_filter(config.filter())
            .boxed()
    } else {
        fmt.compact().with_filter(config.filter()).boxed()
    }
}

fn open_sink(config: &TelemetryConfig) -> Option<Arc<SqliteLogSink>> {
    if !config.log_to_sqlite {
        return None;
    }
    SqliteLogSink::new(&config.log_db_path)
        .map(Arc::new)
        .map_err(|e| eprintln!("ats-telemetry: log database unavailable: {e}"))
        .ok()
}

/// Install the global subscriber. A second call keeps the first subscriber
/// but still opens the sink, so queries keep working.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let log_sink = open_sink(&config);

    let installed = tracing_subscriber::registry()
        .with(stderr_layer(&config))
        .with(log_sink.clone().map(SqliteLogLayer::new))
        .try_init();
    if let Err(e) = installed {
        eprintln!("ats-telemetry: subscriber already installed: {e}");
    }

    TelemetryGuard { log_sink }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.log_level, Level::INFO);
        assert!(!config.json);
        assert!(config.log_db_path.ends_with(".ats-feedback/logs.db"));
    }

    #[test]
    fn directives_list_module_overrides() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![
                ("ats_realtime".into(), Level::DEBUG),
                ("ats_session".into(), Level::TRACE),
            ],
            ..Default::default()
        };
        assert_eq!(
            config.directives(),
            "warn,ats_realtime=debug,ats_session=trace"
        );
    }

    #[test]
    fn disabled_sink_is_not_opened() {
        let config = TelemetryConfig {
            log_to_sqlite: false,
            ..Default::default()
        };
        assert!(open_sink(&config).is_none());
    }
}
