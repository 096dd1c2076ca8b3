//! HTTP request handlers
//!
//! Voice webhooks always answer with TwiML, even for malformed input. The
//! JSON call-control endpoints report failures through [`AppError`].

use super::types::{
    CallStatusQuery, CallStatusResponse, CreateCallRequest, CreateCallResponse, ErrorResponse,
    StatusForm, StepQuery, SuccessResponse, TokenResponse, TranscriptResponse, TtsQuery,
    WebhookForm,
};
use super::AppState;
use crate::dialog::{
    decide, NextAction, ProgressMarker, Turn, OPERATOR_ROUTE, TRANSFER, WEB_CALL,
};
use crate::session::{self, Speaker};
use crate::speech::AUDIO_ROUTE;
use crate::telephony::{VoiceTokenIssuer, CLIENT_IDENTITY};
use crate::twiml::{Prompt, RESPONSE_ROUTE};
use axum::{
    extract::{
        rejection::{FormRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use futures::future::join_all;
use tokio::time::timeout;
use tower_http::services::ServeDir;

const VOICE_ROUTE: &str = "/api/twilio/voice";
const STATUS_ROUTE: &str = "/api/twilio/status";
const CONNECT_OPERATOR_ROUTE: &str = "/api/twilio/voice/connect/operator";
const WEB_CALL_ROUTE: &str = "/api/twilio/voice/web-call";

/// Browser clients calls are bridged to
const OPERATOR_CLIENT: &str = "operator";
const WEB_CALL_CLIENT: &str = "human_operator";

const CLIENT_STATUS_EVENTS: &str = "initiated ringing answered completed";

/// Call statuses after which the provider sends no more webhooks
const TERMINAL_STATUSES: [&str; 5] = ["completed", "busy", "failed", "no-answer", "canceled"];

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let audio_dir = state
        .audio
        .as_ref()
        .map_or_else(|| state.config.audio_dir.clone(), |audio| audio.dir().to_path_buf());

    Router::new()
        // Call entry and speech results
        .route(VOICE_ROUTE, get(voice_webhook).post(voice_webhook))
        .route(RESPONSE_ROUTE, post(voice_webhook))
        // Operator handoff
        .route(OPERATOR_ROUTE, post(operator_webhook))
        .route(CONNECT_OPERATOR_ROUTE, post(connect_operator_webhook))
        .route(WEB_CALL_ROUTE, post(web_call_webhook))
        // Call lifecycle
        .route(STATUS_ROUTE, post(status_webhook))
        // Outbound calls
        .route("/api/twilio/call", post(create_call))
        .route("/api/twilio/call/status", get(call_status))
        .route("/api/twilio/call/:sid/intervene", post(intervene))
        .route("/api/twilio/token", get(access_token))
        // Transcripts
        .route("/api/calls/:sid/transcript", get(get_transcript))
        // Speech synthesis
        .route("/api/tts", get(text_to_speech))
        .nest_service(AUDIO_ROUTE, ServeDir::new(audio_dir))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Voice Webhooks
// ============================================================

async fn voice_webhook(
    State(state): State<AppState>,
    query: Result<Query<StepQuery>, QueryRejection>,
    form: Result<Form<WebhookForm>, FormRejection>,
) -> Response {
    let query = query.map_or_else(
        |e| {
            tracing::warn!(error = %e, "Malformed webhook query, using defaults");
            StepQuery::default()
        },
        |Query(query)| query,
    );
    let form = form.map_or_else(
        |e| {
            tracing::warn!(error = %e, "Malformed webhook body, using defaults");
            WebhookForm::default()
        },
        |Form(form)| form,
    );

    let marker = ProgressMarker::from_param(query.step.as_deref());
    twiml_response(run_turn(&state, marker, &form).await)
}

/// Route one webhook turn and record it against the call.
async fn run_turn(state: &AppState, marker: ProgressMarker, form: &WebhookForm) -> String {
    let call_id = form.call_sid();
    let text = form
        .speech_result
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());
    let retries = call_id
        .and_then(|id| state.sessions.snapshot(id))
        .map_or(0, |session| session.retries);

    let mut decision = decide(&Turn::new(marker, text, form.confidence()).with_retries(retries));
    if state.config.operator_number.is_none() {
        decision = decision.without_operator();
    }

    tracing::info!(
        call_sid = call_id.unwrap_or("-"),
        step = %marker,
        branch = decision.branch,
        retries = decision.retries,
        "Routed call turn"
    );

    let mut utterances = decision.utterances.clone();

    if let Some(id) = call_id {
        if let Some(text) = text {
            state.sessions.append(id, Speaker::Caller, text);
        }
        for utterance in &decision.utterances {
            state.sessions.append(id, Speaker::System, utterance);
        }
        if decision.generate_reply {
            utterances.push(state.chat.complete_chat(state.sessions.as_ref(), id).await);
        }

        let next = match &decision.action {
            NextAction::Continue(next) => *next,
            NextAction::Redirect(_) | NextAction::Hangup => marker,
        };
        state.sessions.advance(id, next, decision.retries);
    } else if decision.generate_reply {
        let history: Vec<_> = text
            .map(|t| session::Turn::new(Speaker::Caller, t))
            .into_iter()
            .collect();
        utterances.push(state.chat.reply_to(&history).await);
    }

    let prompts = speak(state, &utterances).await;
    state.renderer.render(&prompts, &decision.action)
}

async fn operator_webhook(
    State(state): State<AppState>,
    form: Result<Form<WebhookForm>, FormRejection>,
) -> Result<Response, AppError> {
    let form = form.map(|Form(form)| form).unwrap_or_default();
    let Some(call_id) = form.call_sid() else {
        tracing::warn!("Operator webhook called without CallSid");
        return Err(AppError::BadRequest("CallSid required".to_string()));
    };

    let Some(number) = state.config.operator_number.as_deref() else {
        tracing::error!(call_sid = %call_id, "Operator phone number is not configured");
        return Err(AppError::Internal(
            "Operator phone number not set".to_string(),
        ));
    };

    tracing::info!(call_sid = %call_id, "Transferring call to operator");
    state.sessions.append(call_id, Speaker::System, TRANSFER);

    let caller_id = state.config.twilio.as_ref().map(|t| t.phone_number.as_str());
    let prompts = speak(&state, &[TRANSFER.to_string()]).await;
    Ok(twiml_response(
        state.renderer.render_transfer(&prompts, number, caller_id),
    ))
}

/// Bridge a live call to the operator's browser client.
async fn connect_operator_webhook(
    State(state): State<AppState>,
    form: Result<Form<WebhookForm>, FormRejection>,
) -> Response {
    let form = form.map(|Form(form)| form).unwrap_or_default();
    tracing::info!(
        call_sid = form.call_sid().unwrap_or("-"),
        "Connecting call to operator client"
    );

    let mut dial = vec![
        ("timeout", "180"),
        ("timeLimit", "3600"),
        ("answerOnBridge", "true"),
        ("record", "record-from-answer"),
    ];
    if let Some(twilio) = &state.config.twilio {
        dial.push(("callerId", twilio.phone_number.as_str()));
    }

    let status_callback = state.renderer.url(STATUS_ROUTE);
    twiml_response(state.renderer.render_client_dial(
        &[],
        &dial,
        OPERATOR_CLIENT,
        &client_status_attrs(&status_callback),
    ))
}

/// Announce the switch, then bridge the caller to the web-call client.
async fn web_call_webhook(
    State(state): State<AppState>,
    form: Result<Form<WebhookForm>, FormRejection>,
) -> Result<Response, AppError> {
    let form = form.map(|Form(form)| form).unwrap_or_default();
    let Some(call_id) = form.call_sid() else {
        tracing::warn!("Web-call webhook called without CallSid");
        return Err(AppError::BadRequest("CallSid required".to_string()));
    };

    tracing::info!(call_sid = %call_id, "Switching call to web client");
    state.sessions.append(call_id, Speaker::System, WEB_CALL);

    let mut dial = vec![("record", "record-from-answer")];
    if let Some(twilio) = &state.config.twilio {
        dial.push(("callerId", twilio.phone_number.as_str()));
    }

    let status_callback = state.renderer.url(STATUS_ROUTE);
    let prompts = speak(&state, &[WEB_CALL.to_string()]).await;
    Ok(twiml_response(state.renderer.render_client_dial(
        &prompts,
        &dial,
        WEB_CALL_CLIENT,
        &client_status_attrs(&status_callback),
    )))
}

fn client_status_attrs(status_callback: &str) -> [(&'static str, &str); 3] {
    [
        ("statusCallback", status_callback),
        ("statusCallbackEvent", CLIENT_STATUS_EVENTS),
        ("statusCallbackMethod", "POST"),
    ]
}

/// Synthesized clips where available, the provider's voice otherwise
///
/// All clips are synthesized concurrently under one deadline; anything not
/// ready by then is read out with `<Say>`.
async fn speak(state: &AppState, utterances: &[String]) -> Vec<Prompt> {
    let audio_urls = match &state.audio {
        Some(audio) => {
            let synthesis = join_all(utterances.iter().map(|u| audio.audio_url(u)));
            timeout(state.config.synthesis_budget, synthesis)
                .await
                .unwrap_or_else(|_| {
                    tracing::warn!(
                        budget_ms = %state.config.synthesis_budget.as_millis(),
                        prompts = utterances.len(),
                        "Speech synthesis over budget, using provider voice"
                    );
                    vec![None; utterances.len()]
                })
        }
        None => vec![None; utterances.len()],
    };

    utterances
        .iter()
        .zip(audio_urls)
        .map(|(utterance, url)| url.map_or_else(|| Prompt::say(utterance.as_str()), Prompt::Play))
        .collect()
}

fn twiml_response(body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/xml; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
        ],
        body,
    )
        .into_response()
}

// ============================================================
// Call Lifecycle
// ============================================================

async fn status_webhook(
    State(state): State<AppState>,
    form: Result<Form<StatusForm>, FormRejection>,
) -> StatusCode {
    let form = form.map(|Form(form)| form).unwrap_or_default();
    let call_sid = form.call_sid.as_deref().unwrap_or("-");
    let status = form.call_status.as_deref().unwrap_or("unknown");

    tracing::info!(
        call_sid,
        status,
        duration = form.call_duration.as_deref(),
        "Call status update"
    );

    if TERMINAL_STATUSES.contains(&status) {
        if let Some(session) = state.sessions.evict(call_sid) {
            tracing::info!(
                call_sid,
                turns = session.transcript.len(),
                "Evicted finished call"
            );
        }
    }

    StatusCode::NO_CONTENT
}

// ============================================================
// Outbound Calls
// ============================================================

async fn create_call(
    State(state): State<AppState>,
    Json(req): Json<CreateCallRequest>,
) -> Result<Json<CreateCallResponse>, AppError> {
    let client = state.telephony.as_ref().ok_or_else(|| {
        tracing::error!("Outbound call requested but Twilio is not configured");
        AppError::Internal("Twilio is not configured".to_string())
    })?;

    let to = req.to.trim();
    if to.is_empty() {
        return Err(AppError::BadRequest("Destination number required".to_string()));
    }

    let twiml_url = state.renderer.url(VOICE_ROUTE);
    let status_callback = state.renderer.url(STATUS_ROUTE);
    tracing::info!(to, from = client.from_number(), url = %twiml_url, "Placing outbound call");

    let call_sid = client
        .create_call(to, &twiml_url, &status_callback)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to place call");
            AppError::Internal(format!("Failed to place call: {e}"))
        })?;

    tracing::info!(call_sid = %call_sid, "Call created");
    Ok(Json(CreateCallResponse {
        success: true,
        call_sid,
    }))
}

async fn call_status(
    State(state): State<AppState>,
    Query(query): Query<CallStatusQuery>,
) -> Result<Json<CallStatusResponse>, AppError> {
    let call_sid = query
        .call_sid
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("callSid required".to_string()))?;
    let client = state
        .telephony
        .as_ref()
        .ok_or_else(|| AppError::Internal("Twilio is not configured".to_string()))?;

    let status = client.fetch_call_status(&call_sid).await.map_err(|e| {
        tracing::error!(call_sid = %call_sid, error = %e, "Failed to fetch call status");
        AppError::Internal(format!("Failed to fetch call status: {e}"))
    })?;

    Ok(Json(CallStatusResponse { status }))
}

/// Pull a live call out of the script and over to the operator's browser.
async fn intervene(
    State(state): State<AppState>,
    Path(sid): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    let client = state
        .telephony
        .as_ref()
        .ok_or_else(|| AppError::Internal("Twilio is not configured".to_string()))?;

    client
        .redirect_call(&sid, &state.renderer.url(CONNECT_OPERATOR_ROUTE))
        .await
        .map_err(|e| {
            tracing::error!(call_sid = %sid, error = %e, "Failed to redirect call");
            AppError::Internal(format!("Failed to redirect call: {e}"))
        })?;

    tracing::info!(call_sid = %sid, "Operator intervened in call");
    Ok(Json(SuccessResponse { success: true }))
}

/// Access token for the operator's browser voice client
async fn access_token(State(state): State<AppState>) -> Result<Json<TokenResponse>, AppError> {
    let twilio = state.config.twilio.as_ref().ok_or_else(|| {
        tracing::error!("Access token requested but Twilio is not configured");
        AppError::Internal("Twilio is not configured".to_string())
    })?;

    let token = VoiceTokenIssuer::new(twilio)
        .issue(CLIENT_IDENTITY)
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to generate access token");
            AppError::Internal(format!("Failed to generate token: {e}"))
        })?;

    Ok(Json(TokenResponse { token }))
}

// ============================================================
// Transcripts
// ============================================================

async fn get_transcript(
    State(state): State<AppState>,
    Path(sid): Path<String>,
) -> Result<Json<TranscriptResponse>, AppError> {
    state
        .sessions
        .snapshot(&sid)
        .map(|session| Json(session.into()))
        .ok_or_else(|| AppError::NotFound(format!("No session for call {sid}")))
}

// ============================================================
// Speech Synthesis
// ============================================================

async fn text_to_speech(
    State(state): State<AppState>,
    Query(query): Query<TtsQuery>,
) -> Result<Response, AppError> {
    let text = query
        .text
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("text required".to_string()))?;
    let audio = state
        .audio
        .as_ref()
        .ok_or_else(|| AppError::Internal("Speech synthesis is not configured".to_string()))?;

    let bytes = audio.audio_bytes(&text).await.map_err(|e| {
        tracing::error!(error = %e, "Direct synthesis failed");
        AppError::Internal(format!("Speech synthesis failed: {e}"))
    })?;

    Ok(([(header::CONTENT_TYPE, "audio/mpeg")], bytes).into_response())
}

// ============================================================
// Version
// ============================================================

async fn get_version() -> &'static str {
    concat!("callscript ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

enum AppError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
