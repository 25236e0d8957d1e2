//! Parley server binary.
//!
//! Composes the transcription, input, synthesis and agent collaborators from
//! configuration and serves the SSE transcript stream with structured logging
//! and graceful shutdown on SIGTERM/SIGINT.

use parley_server::config::{self, Config};
use parley_server::session::SessionCollaborators;
use parley_server::{app, AppState};
use parley_voice::{
    AgentEventRelay, AudioSourceFactory, CommandAudioSourceFactory, DeepgramTranscriber,
    ElevenLabsSynthesizer, HttpAgentRunner, InMemorySessionStore, MutedSynthesizer,
    NoAudioSource, SpeechSynthesizer,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("PARLEY_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

fn build_synthesizer(config: &Config) -> Arc<dyn SpeechSynthesizer> {
    if !config.synthesis.enabled {
        tracing::info!("speech synthesis disabled");
        return Arc::new(MutedSynthesizer);
    }
    match ElevenLabsSynthesizer::new(config.synthesis.clone()) {
        Ok(synth) => Arc::new(synth),
        Err(e) => {
            tracing::warn!(error = %e, "speech synthesis unavailable, continuing muted");
            Arc::new(MutedSynthesizer)
        }
    }
}

fn build_audio(config: &Config) -> Arc<dyn AudioSourceFactory> {
    match CommandAudioSourceFactory::new(config.audio.clone()) {
        Ok(factory) => Arc::new(factory),
        Err(e) => {
            tracing::warn!(error = %e, "audio capture disabled");
            Arc::new(NoAudioSource)
        }
    }
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration — the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    if config.transcription.api_key.is_empty() {
        tracing::warn!("DEEPGRAM_API_KEY is not set; sessions cannot start transcription");
    }

    // Compose collaborators
    let runner = HttpAgentRunner::new(&config.agent)
        .expect("failed to build agent runner; check agent.url in config");
    let relay = AgentEventRelay::new(
        Arc::new(runner),
        Arc::new(InMemorySessionStore::new()),
        config.session.app_name.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = AppState {
        collaborators: SessionCollaborators {
            transcriber: Arc::new(DeepgramTranscriber::new(config.transcription.clone())),
            audio: build_audio(&config),
            relay,
            synthesizer: build_synthesizer(&config),
        },
        settings: config.session_settings(),
        shutdown: shutdown_rx,
    };

    // Build application
    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, agent = %config.agent.url, "starting parley server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address — is another process using this port?");

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .expect("server error");

    tracing::info!("parley server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown, then
/// tells open sessions to wind down so their connections can close.
async fn shutdown_signal(sessions: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }

    sessions.send_replace(true);
}
