//! kitstream CLI: browse the application catalog and drive streaming sessions.

#![forbid(unsafe_code)]

mod stdio;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use kitstream_client::{
    CatalogClient, ControllerConfig, HttpSessionBackend, SessionBackend, SessionController,
    SessionPhase, StreamTransport, TransportEvent,
};
use kitstream_common::{SourceMode, StreamConfig};

use crate::stdio::StdioTransport;

#[derive(Parser, Debug)]
#[command(name = "kitstream")]
#[command(about = "Control surface for remotely streamed Kit applications")]
struct Args {
    /// Stream configuration file (stream.config.json layout)
    #[arg(short, long, env = "KITSTREAM_CONFIG")]
    config: Option<PathBuf>,

    /// Source mode: gfn, stream or local
    #[arg(long, env = "KITSTREAM_SOURCE")]
    source: Option<String>,

    /// Base URL of the session control plane
    #[arg(long, env = "KITSTREAM_STREAM_SERVER")]
    stream_server: Option<String>,

    /// Base URL of the application catalog (defaults to the stream server)
    #[arg(long, env = "KITSTREAM_APP_SERVER")]
    app_server: Option<String>,

    /// Access token passed to the control plane and the streaming client
    #[arg(long, env = "KITSTREAM_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List applications published in the catalog
    Apps,

    /// List versions of an application
    Versions { app: String },

    /// List streaming profiles of an application version
    Profiles { app: String, version: String },

    /// Create a session and relay the streaming client until stdin closes or Ctrl-C
    Start {
        app: String,
        version: String,
        profile: String,
    },

    /// Attach directly to a local Kit instance
    Local {
        #[arg(long)]
        server: Option<String>,
        #[arg(long)]
        signaling_port: Option<u16>,
        #[arg(long)]
        media_port: Option<u16>,
    },

    /// Show a session as the control plane sees it
    Status { session_id: String },

    /// Destroy a session on the control plane
    End { session_id: String },

    /// Show version information
    Version,
}

fn load_config(args: &Args) -> Result<StreamConfig> {
    let mut config = match &args.config {
        Some(path) => StreamConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => {
            let mut config = StreamConfig::default();
            config.apply_env();
            config
        }
    };
    if let Some(source) = &args.source {
        config.source = SourceMode::parse(source);
    }
    if let Some(server) = &args.stream_server {
        config.stream.stream_server = server.clone();
    }
    if let Some(server) = &args.app_server {
        config.stream.app_server = server.clone();
    }
    if let Some(token) = &args.token {
        config.access_token = token.clone();
    }
    config.normalize();
    Ok(config)
}

fn stream_backend(config: &StreamConfig) -> Result<HttpSessionBackend> {
    if config.stream.stream_server.is_empty() {
        bail!("no stream server configured (use --stream-server or stream.streamServer)");
    }
    Ok(HttpSessionBackend::new(
        config.stream.stream_server.clone(),
        config.access_token.clone(),
    ))
}

fn catalog(config: &StreamConfig) -> Result<CatalogClient> {
    if config.stream.app_server.is_empty() {
        bail!("no app server configured (use --app-server or stream.appServer)");
    }
    Ok(CatalogClient::new(
        config.stream.app_server.clone(),
        config.access_token.clone(),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    kitstream_common::init_tracing();

    let args = Args::parse();
    let mut config = load_config(&args)?;

    match args.command {
        Command::Apps => {
            for app in catalog(&config)?.list_applications().await? {
                println!("{}\t{}", app.id, app.title.unwrap_or_default());
            }
        }
        Command::Versions { app } => {
            for version in catalog(&config)?.list_versions(&app).await? {
                println!("{}", version.version);
            }
        }
        Command::Profiles { app, version } => {
            for profile in catalog(&config)?.list_profiles(&app, &version).await? {
                println!("{}\t{}", profile.id, profile.description.unwrap_or_default());
            }
        }
        Command::Start {
            app,
            version,
            profile,
        } => {
            if config.source == SourceMode::Local {
                bail!("source \"local\" has no control plane; use `kitstream local`");
            }
            config.validate()?;
            let controller = SessionController::new(
                stream_backend(&config)?,
                StdioTransport::new(),
                ControllerConfig::from(&config),
            );
            let phase = controller.start_session(&app, &version, &profile).await?;
            info!(%phase, "session requested");
            relay(&controller).await?;
        }
        Command::Local {
            server,
            signaling_port,
            media_port,
        } => {
            config.source = SourceMode::Local;
            if let Some(server) = server {
                config.local.server = server;
            }
            if let Some(port) = signaling_port {
                config.local.signaling_port = port;
            }
            if let Some(port) = media_port {
                config.local.media_port = port;
            }
            config.validate()?;
            // Local sessions never reach the control plane; the backend is only a placeholder.
            let controller = SessionController::new(
                HttpSessionBackend::new(config.stream.stream_server.clone(), String::new()),
                StdioTransport::new(),
                ControllerConfig::from(&config),
            );
            controller.attach_local(&config.local).await?;
            relay(&controller).await?;
        }
        Command::Status { session_id } => {
            let res = stream_backend(&config)?
                .get_session_info(&session_id)
                .await?;
            let state = if res.is_ready() {
                "ready"
            } else if res.is_pending() {
                "pending"
            } else {
                "error"
            };
            let report = serde_json::json!({
                "status": res.status,
                "state": state,
                "session": res.data,
                "detail": res.detail,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::End { session_id } => {
            let res = stream_backend(&config)?
                .destroy_session(&session_id)
                .await?;
            match res.detail {
                Some(detail) => bail!("destroy reported: {}", detail),
                None => println!("Destroyed {}", session_id),
            }
        }
        Command::Version => {
            println!("kitstream {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

/// Pump streaming-client callbacks from stdin into the controller until the
/// session ends, stdin closes or the user interrupts; then tear down.
async fn relay<B, T>(controller: &SessionController<B, T>) -> Result<()>
where
    B: SessionBackend,
    T: StreamTransport,
{
    let mut notices = controller.subscribe_notices();
    let mut phases = controller.subscribe_phase();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            changed = phases.changed() => {
                if changed.is_err() {
                    break;
                }
                let phase = *phases.borrow_and_update();
                if phase == SessionPhase::Idle {
                    info!("session is over");
                    break;
                }
            }
            notice = notices.recv() => match notice {
                Ok(notice) => warn!(%notice, "notice"),
                Err(RecvError::Lagged(missed)) => warn!(missed, "notices dropped"),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line() => match line? {
                Some(line) => forward(controller, line.trim()).await,
                None => {
                    info!("stdin closed");
                    break;
                }
            },
        }
    }

    let outcome = controller.end_session().await;
    info!(?outcome, "teardown finished");
    Ok(())
}

async fn forward<B, T>(controller: &SessionController<B, T>, line: &str)
where
    B: SessionBackend,
    T: StreamTransport,
{
    if line.is_empty() {
        return;
    }
    match serde_json::from_str::<TransportEvent>(line) {
        Ok(event) => {
            debug!(?event, "transport callback");
            controller.handle_transport_event(event).await;
        }
        Err(_) => controller.handle_remote_message(line).await,
    }
}
