use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voice_interview::audio::{AudioBackendConfig, SpeakerPlayback};
use voice_interview::config::AudioBackendKind;
use voice_interview::{
    create_router, AppState, CaptureDeviceManager, Config, HttpProfileRepository,
    SessionController, SessionSettings, WebSocketConversationClient,
};

#[derive(Parser)]
#[command(name = "voice-interview")]
#[command(about = "Voice interview session coordinator")]
struct Args {
    /// Config file (extension optional)
    #[arg(short, long, default_value = "config/voice-interview")]
    config: String,

    /// Override the HTTP bind address
    #[arg(long)]
    bind: Option<String>,

    /// Override the HTTP port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("Voice Interview v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    info!("Agent: {} at {}", cfg.agent.agent_id, cfg.agent.url);

    let profiles = Arc::new(HttpProfileRepository::new(&cfg.profile_store)?);
    let backend_config = AudioBackendConfig::from(&cfg.audio);
    let devices = Arc::new(match cfg.audio.backend {
        AudioBackendKind::Cpal => CaptureDeviceManager::microphone(backend_config),
        AudioBackendKind::Silence => {
            warn!("Audio backend is 'silence'; the agent will not hear the candidate");
            CaptureDeviceManager::silent(backend_config)
        }
    });

    let mut conversation = WebSocketConversationClient::new(&cfg.agent);
    if cfg.audio.playback {
        match SpeakerPlayback::open() {
            Ok(speaker) => conversation = conversation.with_playback(Arc::new(speaker)),
            Err(e) => warn!("Agent audio will not be played: {}", e),
        }
    }
    let conversation = Arc::new(conversation);

    let settings = SessionSettings {
        agent_id: cfg.agent.agent_id.clone(),
        max_session_duration: cfg.session.max_duration(),
    };
    if let Some(limit) = settings.max_session_duration {
        info!("Sessions end after {:?}", limit);
    }

    let (controller, session) = SessionController::new(profiles, devices, conversation, settings);
    let controller = controller.spawn();

    let app = create_router(AppState::new(session.clone()));

    let bind = args.bind.unwrap_or(cfg.service.http.bind);
    let port = args.port.unwrap_or(cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind((bind.as_str(), port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", bind, port))?;

    info!("HTTP server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await
        .context("HTTP server failed")?;

    // Releases the microphone and closes any open agent session
    let _ = session.shutdown();
    controller.await.context("Session controller panicked")?;

    info!("Stopped");
    Ok(())
}
