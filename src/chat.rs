//! Free-conversation replies from the chat model
//!
//! Builds a request from the call transcript and fails open: any error,
//! timeout or missing configuration yields a fixed apology instead.

use crate::llm::{LlmMessage, LlmRequest, LlmService};
use crate::session::{SessionStore, Speaker, Turn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "あなたは電話応対をする親切なアシスタントです。音声で読み上げられるため、簡潔に、かつ丁寧に応答してください。";

/// Spoken when the model cannot be reached
pub const CHAT_FALLBACK: &str = "申し訳ありません。エラーが発生しました。";

const MAX_TOKENS: u32 = 150;
const TEMPERATURE: f32 = 0.7;

/// Produces spoken replies for the assistant step
pub struct ChatResponder {
    llm: Option<Arc<dyn LlmService>>,
    system_prompt: String,
    timeout: Duration,
}

impl ChatResponder {
    pub fn new(
        llm: Option<Arc<dyn LlmService>>,
        system_prompt: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
            timeout,
        }
    }

    /// Generate the next reply for a call and append it to the transcript.
    ///
    /// The caller's latest utterance must already be in the store.
    pub async fn complete_chat(&self, store: &dyn SessionStore, call_id: &str) -> String {
        let history = store.get(call_id);
        let reply = self.reply_to(&history).await;
        store.append(call_id, Speaker::System, &reply);
        reply
    }

    /// Ask the model for a reply to `history`, never failing.
    pub async fn reply_to(&self, history: &[Turn]) -> String {
        let Some(llm) = &self.llm else {
            tracing::warn!("Chat reply requested but no chat model is configured");
            return CHAT_FALLBACK.to_string();
        };

        let request = build_request(&self.system_prompt, history);

        match timeout(self.timeout, llm.complete(&request)).await {
            Ok(Ok(response)) => {
                let text = response.text.trim();
                if text.is_empty() {
                    tracing::warn!("Chat model returned an empty reply");
                    CHAT_FALLBACK.to_string()
                } else {
                    text.to_string()
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(kind = ?e.kind, "Chat reply failed: {}", e.message);
                CHAT_FALLBACK.to_string()
            }
            Err(_) => {
                tracing::warn!(timeout_ms = %self.timeout.as_millis(), "Chat reply timed out");
                CHAT_FALLBACK.to_string()
            }
        }
    }
}

/// Caller turns become user messages, our own turns assistant messages.
fn build_request(system_prompt: &str, history: &[Turn]) -> LlmRequest {
    let messages = history
        .iter()
        .map(|turn| match turn.speaker {
            Speaker::Caller => LlmMessage::user(&turn.text),
            Speaker::System => LlmMessage::assistant(&turn.text),
        })
        .collect();

    LlmRequest {
        system: Some(system_prompt.to_string()),
        messages,
        max_tokens: Some(MAX_TOKENS),
        temperature: Some(TEMPERATURE),
    }
}
