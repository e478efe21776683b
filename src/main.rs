mod config;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn, Level};

use ats_core::{ContextInfo, Provider, ProviderConfig};
use ats_realtime::{ConnectionState, FeedbackEvent, MessageRouter};
use ats_session::{HttpSessionApi, SessionManager};
use ats_store::{ClientStateRepo, Database, KvStore};
use ats_telemetry::{init_telemetry, LogQuery};

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "ats-feedback", version, about = "Real-time LLM feedback client")]
struct Cli {
    /// Session API base URL (overrides ATS_API_URL).
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Feedback socket base URL (overrides ATS_WS_URL).
    #[arg(long, global = true)]
    ws_url: Option<String>,
    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Test a provider configuration and create a session for it.
    Configure(ConfigureArgs),
    /// Show the persisted configuration and session.
    Status,
    /// Revalidate the persisted session with the server.
    Validate,
    /// Remove the persisted configuration and session.
    Clear,
    /// Stream feedback events as JSON lines.
    Watch(WatchArgs),
    /// Print persisted warning and error logs.
    Logs {
        #[arg(long)]
        level: Option<String>,
        /// Error kind, e.g. `socket_connect_error`.
        #[arg(long)]
        kind: Option<String>,
        #[arg(long)]
        session: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

#[derive(Args)]
struct ConfigureArgs {
    #[arg(long)]
    provider: Provider,
    #[arg(long, env = "ATS_PROVIDER_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    #[arg(long)]
    url: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    organization_id: Option<String>,
    #[arg(long)]
    deployment_name: Option<String>,
}

impl ConfigureArgs {
    fn into_config(self) -> ProviderConfig {
        ProviderConfig {
            provider: self.provider,
            api_key: self.api_key.map(ats_core::ApiKey::new),
            url: self.url,
            model: self.model,
            organization_id: self.organization_id,
            deployment_name: self.deployment_name,
        }
    }
}

#[derive(Args)]
struct WatchArgs {
    /// Section name for a one-off feedback request once connected.
    #[arg(long, requires = "file")]
    section: Option<String>,
    /// File whose contents are sent with the feedback request.
    #[arg(long, requires = "section")]
    file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::from_env()?;
    if let Some(url) = &cli.api_url {
        config.session = config.session.with_api_base_url(url.clone());
    }
    if let Some(url) = &cli.ws_url {
        config.ws_base = Some(url.clone());
    }
    if cli.verbose {
        config.telemetry.log_level = Level::DEBUG;
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;
    runtime.block_on(run(cli.command, config))
}

async fn run(command: Command, config: AppConfig) -> Result<()> {
    let telemetry = init_telemetry(config.telemetry.clone());

    match command {
        Command::Configure(args) => {
            let manager = open_manager(&config)?;
            let session_id = match manager.configure(args.into_config()).await {
                Ok(id) => id,
                Err(e) => {
                    println!("{}", json!({ "error": e.error_kind(), "detail": e.detail() }));
                    return Err(e.into());
                }
            };
            let expires_at = manager.session().map(|s| s.expires_at.to_rfc3339());
            println!(
                "{}",
                json!({ "session_id": session_id.as_str(), "expires_at": expires_at })
            );
        }
        Command::Status => {
            let manager = open_manager(&config)?;
            let session = manager.session();
            let provider = manager.config();
            let now = Utc::now();
            println!(
                "{}",
                json!({
                    "state": manager.state().as_str(),
                    "configured": manager.is_configured(),
                    "session_valid": manager.is_session_valid(),
                    "session_id": session.as_ref().map(|s| s.session_id.as_str().to_string()),
                    "expires_at": session.as_ref().map(|s| s.expires_at.to_rfc3339()),
                    "remaining_secs": session.as_ref().map(|s| s.remaining(now).num_seconds()),
                    "provider": provider.as_ref().map(|c| c.provider.to_string()),
                    "model": provider.as_ref().map(|c| c.model_name().to_string()),
                    "device_id": manager.device_id()?.as_str(),
                })
            );
        }
        Command::Validate => {
            let manager = open_manager(&config)?;
            let valid = manager.validate_current().await;
            println!("{}", json!({ "valid": valid, "state": manager.state().as_str() }));
            if !valid {
                bail!("session is not valid; local state cleared");
            }
        }
        Command::Clear => {
            open_manager(&config)?.clear()?;
            println!("{}", json!({ "cleared": true }));
        }
        Command::Watch(args) => watch(&open_manager(&config)?, &config, args).await?,
        Command::Logs {
            level,
            kind,
            session,
            limit,
        } => {
            let Some(logs) = telemetry.logs() else {
                bail!("log database unavailable at {}", config.telemetry.log_db_path.display());
            };
            let records = logs.query(&LogQuery {
                level,
                kind,
                session_id: session,
                since: None,
                limit: Some(limit),
            })?;
            for record in records {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
    }
    Ok(())
}

fn open_manager(config: &AppConfig) -> Result<SessionManager<HttpSessionApi>> {
    let db = Database::open(&config.state_db_path())?;
    Ok(SessionManager::new(
        HttpSessionApi::new(config.session.clone()),
        ClientStateRepo::new(KvStore::new(db)),
        config.session.clone(),
    ))
}

async fn watch(
    manager: &SessionManager<HttpSessionApi>,
    config: &AppConfig,
    args: WatchArgs,
) -> Result<()> {
    if !manager.validate_current().await {
        bail!("no valid session; run `ats-feedback configure` first");
    }
    let Some(session) = manager.session() else {
        bail!("session disappeared during validation");
    };
    let device_id = manager.device_id()?;

    let mut request = match (args.section, args.file) {
        (Some(section), Some(path)) => {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            Some((section, content))
        }
        _ => None,
    };

    let connection =
        config.connection_for(Some(session.session_id.as_str()), Some(device_id.as_str()));
    info!(url = %connection.url, "watching feedback");
    let router = MessageRouter::spawn(
        connection,
        ContextInfo {
            session_id: Some(session.session_id.to_string()),
            user_id: Some(device_id.to_string()),
        },
    );
    let mut events = router.subscribe();
    router.connect();

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", serde_json::to_string(&event)?);
                    match event {
                        FeedbackEvent::ConnectionChanged(ConnectionState::Connected) => {
                            if let Some((section, content)) = request.take() {
                                router.request_feedback(section, content, None);
                            }
                        }
                        FeedbackEvent::ReconnectExhausted { attempts } => {
                            break Err(anyhow::anyhow!(
                                "connection lost after {attempts} reconnect attempts"
                            ));
                        }
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => break Ok(()),
            }
        }
    };

    router.disconnect();
    router.shutdown();
    outcome
}
