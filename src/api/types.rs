//! API request and response types

use crate::dialog::ProgressMarker;
use crate::session::{CallSession, Turn};
use serde::{Deserialize, Serialize};

/// `?step=` on the voice webhooks
#[derive(Debug, Default, Deserialize)]
pub struct StepQuery {
    pub step: Option<String>,
}

/// Fields the provider posts to the voice webhooks
///
/// Everything is optional; confidence stays a string so a malformed value
/// degrades to "unknown" instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookForm {
    #[serde(rename = "CallSid")]
    pub call_sid: Option<String>,
    #[serde(rename = "SpeechResult")]
    pub speech_result: Option<String>,
    #[serde(rename = "Confidence")]
    pub confidence: Option<String>,
}

impl WebhookForm {
    pub fn call_sid(&self) -> Option<&str> {
        self.call_sid.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn confidence(&self) -> Option<f32> {
        self.confidence.as_deref()?.trim().parse().ok()
    }
}

/// Call status callback
#[derive(Debug, Default, Deserialize)]
pub struct StatusForm {
    #[serde(rename = "CallSid")]
    pub call_sid: Option<String>,
    #[serde(rename = "CallStatus")]
    pub call_status: Option<String>,
    #[serde(rename = "CallDuration")]
    pub call_duration: Option<String>,
}

/// Request to place an outbound call
#[derive(Debug, Deserialize)]
pub struct CreateCallRequest {
    pub to: String,
}

/// Response for a placed call
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCallResponse {
    pub success: bool,
    pub call_sid: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStatusQuery {
    pub call_sid: Option<String>,
}

/// Response for a call status lookup
#[derive(Debug, Serialize)]
pub struct CallStatusResponse {
    pub status: String,
}

/// Response for operator intervention
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Browser voice client access token
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Response with a call's transcript
#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    pub call_id: String,
    pub marker: ProgressMarker,
    pub retries: u32,
    pub turns: Vec<Turn>,
}

impl From<CallSession> for TranscriptResponse {
    fn from(session: CallSession) -> Self {
        Self {
            call_id: session.call_id,
            marker: session.marker,
            retries: session.retries,
            turns: session.transcript,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TtsQuery {
    pub text: Option<String>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
