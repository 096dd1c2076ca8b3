//! Environment-driven configuration
//!
//! Everything is read once at startup. Optional integrations stay `None`
//! when their settings are missing; endpoints that need them report the gap
//! at request time instead of refusing to boot.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Chat-completion settings
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: String,
}

/// Speech-synthesis settings
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub api_key: String,
    pub voice_id: String,
}

/// Twilio account settings
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub phone_number: String,
    /// API key pair for signing browser access tokens; the account
    /// credentials sign them when unset
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    /// TwiML application outgoing browser calls are routed through
    pub app_sid: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Public URL the provider uses to reach this service (e.g. an ngrok tunnel)
    pub public_base_url: String,
    pub chat: Option<ChatConfig>,
    pub chat_timeout: Duration,
    pub speech: Option<SpeechConfig>,
    /// Deadline for synthesizing every prompt of one webhook response
    pub synthesis_budget: Duration,
    pub audio_dir: PathBuf,
    pub twilio: Option<TwilioConfig>,
    pub operator_number: Option<String>,
    /// Voice and language for `<Say>` and `<Gather>`
    pub say_voice: String,
    pub language: String,
    pub session_idle_timeout: Duration,
    pub max_transcript_turns: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let chat = get("OPENAI_API_KEY").map(|api_key| ChatConfig {
            api_key,
            base_url: get("OPENAI_BASE_URL"),
            model: get("CHAT_MODEL").unwrap_or_else(|| "gpt-3.5-turbo".to_string()),
        });

        let speech = match (get("ELEVENLABS_API_KEY"), get("ELEVENLABS_VOICE_ID")) {
            (Some(api_key), Some(voice_id)) => Some(SpeechConfig { api_key, voice_id }),
            _ => None,
        };

        let twilio = match (
            get("TWILIO_ACCOUNT_SID"),
            get("TWILIO_AUTH_TOKEN"),
            get("TWILIO_PHONE_NUMBER"),
        ) {
            (Some(account_sid), Some(auth_token), Some(phone_number)) => Some(TwilioConfig {
                account_sid,
                auth_token,
                phone_number,
                api_key: get("TWILIO_API_KEY"),
                api_secret: get("TWILIO_API_SECRET"),
                app_sid: get("TWILIO_APP_SID"),
            }),
            _ => None,
        };

        let port = parse_or("PORT", get("PORT"), 3001)?;
        let public_base_url = get("PUBLIC_BASE_URL")
            .or_else(|| get("NGROK_URL"))
            .unwrap_or_else(|| format!("http://localhost:{port}"))
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            port,
            public_base_url,
            chat,
            chat_timeout: Duration::from_secs(parse_or(
                "CHAT_TIMEOUT_SECS",
                get("CHAT_TIMEOUT_SECS"),
                8,
            )?),
            speech,
            synthesis_budget: Duration::from_secs(parse_or(
                "SYNTHESIS_BUDGET_SECS",
                get("SYNTHESIS_BUDGET_SECS"),
                8,
            )?),
            audio_dir: get("AUDIO_DIR").map_or_else(|| PathBuf::from("./public/audio"), PathBuf::from),
            twilio,
            operator_number: get("OPERATOR_PHONE_NUMBER"),
            say_voice: get("SAY_VOICE").unwrap_or_else(|| "Polly.Mizuki".to_string()),
            language: get("SPEECH_LANGUAGE").unwrap_or_else(|| "ja-JP".to_string()),
            session_idle_timeout: Duration::from_secs(parse_or(
                "SESSION_IDLE_TIMEOUT_SECS",
                get("SESSION_IDLE_TIMEOUT_SECS"),
                30 * 60,
            )?),
            max_transcript_turns: parse_or(
                "MAX_TRANSCRIPT_TURNS",
                get("MAX_TRANSCRIPT_TURNS"),
                crate::session::DEFAULT_MAX_TURNS,
            )?,
        })
    }
}

fn parse_or<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
    }
}
