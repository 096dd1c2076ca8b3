//! HTTP API: provider webhooks and call-control endpoints

mod handlers;
mod types;

#[cfg(test)]
mod tests;

pub use handlers::create_router;

use crate::chat::ChatResponder;
use crate::config::Config;
use crate::session::SessionStore;
use crate::speech::AudioCache;
use crate::telephony::TwilioClient;
use crate::twiml::Renderer;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<dyn SessionStore>,
    pub chat: Arc<ChatResponder>,
    /// Synthesized audio; `None` means prompts are read by the provider's voice
    pub audio: Option<Arc<AudioCache>>,
    pub renderer: Arc<Renderer>,
    pub telephony: Option<Arc<TwilioClient>>,
}

impl AppState {
    pub fn new(
        config: Config,
        sessions: Arc<dyn SessionStore>,
        chat: ChatResponder,
        audio: Option<AudioCache>,
        telephony: Option<TwilioClient>,
    ) -> Self {
        let renderer = Renderer::new(
            config.public_base_url.clone(),
            config.say_voice.clone(),
            config.language.clone(),
        );
        Self {
            config: Arc::new(config),
            sessions,
            chat: Arc::new(chat),
            audio: audio.map(Arc::new),
            renderer: Arc::new(renderer),
            telephony: telephony.map(Arc::new),
        }
    }
}
