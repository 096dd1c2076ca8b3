//! Speech synthesis with an on-disk audio cache
//!
//! Synthesized clips are stored under a content-hash file name and served
//! back to the provider as `<Play>` URLs. Synthesis fails open: callers get
//! `None` and fall back to the provider's own text-to-speech.

mod elevenlabs;

pub use elevenlabs::ElevenLabsService;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Route prefix the cached clips are served under
pub const AUDIO_ROUTE: &str = "/audio";

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("synthesis request failed: {0}")]
    Request(String),
    #[error("synthesis API returned HTTP {status}: {body}")]
    Api { status: u16, body: String },
    #[error("audio cache I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Text-to-speech backend
#[async_trait]
pub trait SpeechService: Send + Sync {
    /// Synthesize `text` into MP3 audio
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SpeechError>;
}

/// Cache file name for a piece of text
pub fn cache_key(text: &str) -> String {
    format!("{:x}.mp3", Sha256::digest(text.as_bytes()))
}

/// Disk cache of synthesized clips in front of a [`SpeechService`]
pub struct AudioCache {
    service: Arc<dyn SpeechService>,
    dir: PathBuf,
    base_url: String,
}

impl AudioCache {
    pub fn new(service: Arc<dyn SpeechService>, dir: impl Into<PathBuf>, base_url: &str) -> Self {
        Self {
            service,
            dir: dir.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Public URL of the clip for `text`, synthesizing it on a cache miss.
    ///
    /// Returns `None` on any failure.
    pub async fn audio_url(&self, text: &str) -> Option<String> {
        match self.ensure_cached(text).await {
            Ok(name) => Some(format!("{}{AUDIO_ROUTE}/{name}", self.base_url)),
            Err(e) => {
                tracing::warn!(error = %e, chars = text.chars().count(), "Speech synthesis failed");
                None
            }
        }
    }

    /// Raw MP3 bytes for `text`, going through the cache.
    pub async fn audio_bytes(&self, text: &str) -> Result<Vec<u8>, SpeechError> {
        let name = self.ensure_cached(text).await?;
        Ok(tokio::fs::read(self.dir.join(name)).await?)
    }

    async fn ensure_cached(&self, text: &str) -> Result<String, SpeechError> {
        let name = cache_key(text);
        let path = self.dir.join(&name);

        if tokio::fs::try_exists(&path).await? {
            tracing::debug!(file = %name, "Audio cache hit");
            return Ok(name);
        }

        let audio = self.service.synthesize(text).await?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let bytes = audio.len();
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || persist_clip(&dir, &path, &audio))
            .await
            .map_err(std::io::Error::other)??;

        tracing::info!(file = %name, bytes, "Cached synthesized audio");
        Ok(name)
    }
}

/// Write `audio` to a private temp file in `dir`, then move it into place.
///
/// Clips only appear under their final name once fully written, and
/// concurrent misses for the same text never share a temp file.
fn persist_clip(dir: &Path, path: &Path, audio: &[u8]) -> std::io::Result<()> {
    let mut tmp = tempfile::Builder::new()
        .suffix(".part")
        .tempfile_in(dir)?;
    tmp.write_all(audio)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
