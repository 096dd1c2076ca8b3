//! `ElevenLabs` text-to-speech client

use super::{SpeechError, SpeechService};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

const API_BASE: &str = "https://api.elevenlabs.io/v1/text-to-speech";
pub const DEFAULT_MODEL_ID: &str = "eleven_multilingual_v2";

pub struct ElevenLabsService {
    client: Client,
    api_key: String,
    voice_id: String,
    model_id: String,
}

impl ElevenLabsService {
    pub fn new(api_key: String, voice_id: String, timeout: Duration) -> Result<Self, SpeechError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SpeechError::Request(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            voice_id,
            model_id: DEFAULT_MODEL_ID.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{API_BASE}/{}", self.voice_id)
    }

    fn request_body<'a>(&'a self, text: &'a str) -> SynthesisRequest<'a> {
        SynthesisRequest {
            text,
            model_id: &self.model_id,
            voice_settings: VoiceSettings {
                stability: 0.5,
                similarity_boost: 0.5,
            },
        }
    }
}

#[async_trait]
impl SpeechService for ElevenLabsService {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SpeechError> {
        let response = self
            .client
            .post(self.endpoint())
            .header("xi-api-key", &self.api_key)
            .header(reqwest::header::ACCEPT, "audio/mpeg")
            .json(&self.request_body(text))
            .send()
            .await
            .map_err(|e| SpeechError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| SpeechError::Request(format!("Failed to read audio: {e}")))?;
        Ok(audio.to_vec())
    }
}

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Debug, Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}
