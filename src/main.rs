use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use meeting_audio_capture::config::DEFAULT_CONFIG_PATH;
use meeting_audio_capture::receiver::LedgerLimits;
use meeting_audio_capture::{
    create_receiver_router, create_router, AppState, ChunkDispatcher, Config, FileStateStore, OriginContext,
    ReceiverState, RecordingCoordinator, SessionServices, SessionStateStore, SetupRequest, SourceDescriptor,
    StopOutcome,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "meeting-audio-capture")]
#[command(about = "Capture meeting audio and stream it to a webhook in chunks")]
struct Cli {
    /// Config file (extension optional)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record one session until the duration elapses or Ctrl+C
    Record {
        /// microphone | system | combined
        #[arg(short, long, default_value = "microphone")]
        source: SourceDescriptor,

        /// URL of the page being recorded
        #[arg(short, long, default_value = "")]
        url: String,

        /// Page title
        #[arg(short, long)]
        title: Option<String>,

        /// Webhook endpoint (default: webhook.url)
        #[arg(short, long)]
        endpoint: Option<String>,

        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },

    /// Serve the recording control API
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run the webhook receiver and its dashboard API
    Receive {
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Send one test chunk to the webhook
    Probe {
        /// Webhook endpoint (default: webhook.url)
        #[arg(short, long)]
        endpoint: Option<String>,
    },

    /// Print the persisted recording state
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;
    info!("Loaded config: {}", cfg.service.name);

    match cli.command {
        Command::Record {
            source,
            url,
            title,
            endpoint,
            duration,
        } => {
            let request = SetupRequest {
                source,
                endpoint: endpoint.unwrap_or_else(|| cfg.webhook.url.clone()),
                origin: OriginContext::from_page(&url, title.as_deref()),
            };
            record(&cfg, request, duration.map(Duration::from_secs)).await
        }
        Command::Serve { port } => serve(&cfg, port.unwrap_or(cfg.service.http.port)).await,
        Command::Receive { port } => receive(&cfg, port.unwrap_or(cfg.receiver.port)).await,
        Command::Probe { endpoint } => probe(&cfg, endpoint.unwrap_or_else(|| cfg.webhook.url.clone())).await,
        Command::Status => status(&cfg).await,
    }
}

async fn record(cfg: &Config, request: SetupRequest, duration: Option<Duration>) -> Result<()> {
    let coordinator = RecordingCoordinator::new(SessionServices::from_config(cfg)?);

    info!("Recording {} audio to {}", request.source, request.endpoint);
    let setup = coordinator.setup(request).await?;
    if !setup.ready {
        bail!(
            "Recording not ready: {}",
            setup.reason.unwrap_or_else(|| "unknown reason".to_string())
        );
    }

    let session_id = coordinator.start().await?;
    info!("Session {} started. Press Ctrl+C to stop", session_id);

    let mut indicator = coordinator.indicator();
    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted, finalizing"),
        _ = deadline => info!("Duration elapsed, finalizing"),
        _ = indicator.wait_for(|on| !*on) => warn!("Session ended on its own"),
    }

    match coordinator.stop_requested().await? {
        StopOutcome::Stopped(summary) => {
            info!("Recording complete!");
            info!("Session: {}", summary.session_id);
            info!(
                "Chunks delivered: {}, abandoned: {}",
                summary.chunks_delivered, summary.chunks_abandoned
            );
            info!("Bytes sent: {}", summary.bytes_sent);
            info!("Duration: {:.1}s", summary.duration_secs);
        }
        StopOutcome::StaleCleared(session_id) => warn!("Cleared stale state for {:?}", session_id),
        StopOutcome::Stopping(session_id) => info!("Session {} is already stopping", session_id),
        StopOutcome::NotRecording => warn!("Session had already ended"),
    }

    Ok(())
}

async fn serve(cfg: &Config, port: u16) -> Result<()> {
    let coordinator = Arc::new(RecordingCoordinator::new(SessionServices::from_config(cfg)?));
    let app = create_router(AppState::new(Arc::clone(&coordinator), cfg.webhook.url.clone()));

    let addr = format!("{}:{}", cfg.service.http.bind, port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Control API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // Deliver the final chunk of a session still running at shutdown
    if let StopOutcome::Stopped(summary) = coordinator.stop_requested().await? {
        info!("Stopped session {} on shutdown", summary.session_id);
    }
    Ok(())
}

async fn receive(cfg: &Config, port: u16) -> Result<()> {
    let state = ReceiverState::new(LedgerLimits {
        max_chunks: cfg.receiver.max_chunks,
        max_attempts: cfg.receiver.max_attempts,
        max_sessions_listed: cfg.receiver.max_sessions_listed,
    });
    let app = create_receiver_router(state);

    let addr = format!("{}:{}", cfg.receiver.bind, port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Webhook receiver listening on http://{}/webhook/meeting-audio", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

async fn probe(cfg: &Config, endpoint: String) -> Result<()> {
    let dispatcher = ChunkDispatcher::http(cfg.dispatch_config()).context("Failed to create webhook client")?;

    info!("Probing {}", endpoint);
    let report = dispatcher.probe(&endpoint).await;
    for attempt in &report.attempts {
        info!(
            "Attempt {}: status {:?} in {}ms",
            attempt.attempt,
            attempt.status,
            attempt.latency.as_millis()
        );
    }

    if !report.is_delivered() {
        bail!("Webhook probe failed: {:?}", report.outcome);
    }
    info!("Webhook reachable");
    Ok(())
}

async fn status(cfg: &Config) -> Result<()> {
    let store = FileStateStore::new(cfg.state_path());
    match store.load().await? {
        Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
        None => println!("Not recording (no state at {})", store.path().display()),
    }
    Ok(())
}
