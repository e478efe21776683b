use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use ats_realtime::{feedback_url, ConnectionConfig};
use ats_session::SessionConfig;
use ats_telemetry::TelemetryConfig;
use tracing::Level;

/// Everything the binary needs, from defaults then `ATS_*` environment overrides.
/// CLI flags are applied on top by the caller.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Data directory holding `state.db` and `logs.db`.
    pub home: PathBuf,
    pub session: SessionConfig,
    pub connection: ConnectionConfig,
    /// Socket base when it differs from the API base.
    pub ws_base: Option<String>,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let home = get("ATS_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| home_dir().join(".ats-feedback"));

        let mut session = SessionConfig::default();
        if let Some(url) = get("ATS_API_URL") {
            session = session.with_api_base_url(url);
        }
        if let Some(hours) = parse(&get, "ATS_SESSION_HOURS")? {
            session.session_duration_hours = hours;
        }

        let mut connection = ConnectionConfig::default();
        if let Some(ms) = parse::<u64>(&get, "ATS_RECONNECT_INTERVAL_MS")? {
            connection.reconnect_interval = Duration::from_millis(ms);
        }
        if let Some(max) = parse(&get, "ATS_MAX_RECONNECT_ATTEMPTS")? {
            connection.max_reconnect_attempts = max;
        }

        let mut telemetry = TelemetryConfig {
            log_level: Level::WARN,
            log_db_path: home.join("logs.db"),
            ..TelemetryConfig::default()
        };
        if let Some(json) = parse(&get, "ATS_LOG_JSON")? {
            telemetry.json = json;
        }
        if let Some(level) = parse(&get, "ATS_LOG_LEVEL")? {
            telemetry.log_level = level;
        }

        Ok(Self {
            home,
            session,
            connection,
            ws_base: get("ATS_WS_URL"),
            telemetry,
        })
    }

    pub fn state_db_path(&self) -> PathBuf {
        self.home.join("state.db")
    }

    /// Connection settings targeting the feedback socket for this session and device.
    pub fn connection_for(&self, session_id: Option<&str>, user_id: Option<&str>) -> ConnectionConfig {
        let base = self
            .ws_base
            .as_deref()
            .unwrap_or(&self.session.api_base_url);
        ConnectionConfig {
            url: feedback_url(base, session_id, user_id),
            ..self.connection.clone()
        }
    }
}

fn parse<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("invalid {key}: {raw:?}")),
        None => Ok(None),
    }
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
