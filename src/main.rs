//! callscript - scripted outbound sales calls over Twilio voice webhooks
//!
//! Routes each caller utterance through a fixed call script, keeps a
//! per-call transcript, and answers the provider with TwiML.

mod api;
mod chat;
mod config;
mod dialog;
mod llm;
mod session;
mod speech;
mod telephony;
mod twiml;

#[cfg(test)]
mod testing;

use api::{create_router, AppState};
use chat::{ChatResponder, DEFAULT_SYSTEM_PROMPT};
use config::Config;
use llm::{LlmService, LoggingService, OpenAIService};
use session::{InMemorySessionStore, SessionStore};
use speech::{AudioCache, ElevenLabsService};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use telephony::TwilioClient;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Timeout for speech synthesis and Twilio REST calls
const ADAPTER_TIMEOUT: Duration = Duration::from_secs(15);

/// How often idle sessions are swept
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "callscript=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let config = Config::from_env()?;
    tracing::info!(base_url = %config.public_base_url, "Loaded configuration");

    // Chat model
    let llm: Option<Arc<dyn LlmService>> = match &config.chat {
        Some(chat) => {
            let service = OpenAIService::new(
                chat.api_key.clone(),
                chat.model.clone(),
                chat.base_url.as_deref(),
                config.chat_timeout,
            )?;
            tracing::info!(model = %chat.model, "Chat model configured");
            Some(Arc::new(LoggingService::new(Arc::new(service))))
        }
        None => {
            tracing::warn!("No chat model configured. Set OPENAI_API_KEY for the assistant step.");
            None
        }
    };
    let chat = ChatResponder::new(llm, DEFAULT_SYSTEM_PROMPT, config.chat_timeout);

    // Speech synthesis
    let audio = match &config.speech {
        Some(speech) => {
            tokio::fs::create_dir_all(&config.audio_dir).await?;
            let service = ElevenLabsService::new(
                speech.api_key.clone(),
                speech.voice_id.clone(),
                ADAPTER_TIMEOUT,
            )?;
            tracing::info!(dir = %config.audio_dir.display(), "Speech synthesis configured");
            Some(AudioCache::new(
                Arc::new(service),
                config.audio_dir.clone(),
                &config.public_base_url,
            ))
        }
        None => {
            tracing::warn!("Speech synthesis not configured; prompts use the provider's voice");
            None
        }
    };

    // Telephony
    let telephony = match &config.twilio {
        Some(twilio) => Some(TwilioClient::new(
            twilio.account_sid.clone(),
            twilio.auth_token.clone(),
            twilio.phone_number.clone(),
            ADAPTER_TIMEOUT,
        )?),
        None => {
            tracing::warn!("Twilio not configured; outbound calls are disabled");
            None
        }
    };
    if config.operator_number.is_none() {
        tracing::warn!("OPERATOR_PHONE_NUMBER not set; operator handoffs end the call instead");
    }

    // Sessions
    let sessions: Arc<dyn SessionStore> =
        Arc::new(InMemorySessionStore::new(config.max_transcript_turns));
    spawn_idle_sweeper(sessions.clone(), config.session_idle_timeout);

    let port = config.port;
    let state = AppState::new(config, sessions, chat, audio, telephony);

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(compression);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("callscript listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically drop sessions whose call never reported a final status.
fn spawn_idle_sweeper(sessions: Arc<dyn SessionStore>, max_idle: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let evicted = sessions.evict_idle(max_idle);
            if evicted > 0 {
                tracing::info!(evicted, "Evicted idle call sessions");
            }
        }
    });
}
