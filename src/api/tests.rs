use super::{create_router, AppState};
use crate::chat::{ChatResponder, CHAT_FALLBACK, DEFAULT_SYSTEM_PROMPT};
use crate::config::{Config, TwilioConfig};
use crate::dialog::ProgressMarker;
use crate::session::{InMemorySessionStore, SessionStore, Speaker};
use crate::speech::AudioCache;
use crate::telephony::TwilioClient;
use crate::testing::{MockLlmService, MockSpeechService};
use axum::{
    body::Body,
    extract::Path,
    http::{header, Request, StatusCode},
    routing::post,
    Form, Json, Router,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt; // for oneshot

const BASE_URL: &str = "https://voice.example.com";

struct Harness {
    app: Router,
    sessions: Arc<InMemorySessionStore>,
    llm: Arc<MockLlmService>,
}

fn test_config(operator: Option<&str>) -> Config {
    let mut config = Config::from_lookup(|_| None).unwrap();
    config.public_base_url = BASE_URL.to_string();
    config.operator_number = operator.map(str::to_string);
    config
}

fn harness_with(config: Config, audio: Option<AudioCache>) -> Harness {
    harness_with_telephony(config, audio, None)
}

fn harness_with_telephony(
    config: Config,
    audio: Option<AudioCache>,
    telephony: Option<TwilioClient>,
) -> Harness {
    let sessions = Arc::new(InMemorySessionStore::default());
    let llm = Arc::new(MockLlmService::new());
    let chat = ChatResponder::new(
        Some(llm.clone()),
        DEFAULT_SYSTEM_PROMPT,
        Duration::from_secs(1),
    );
    let state = AppState::new(config, sessions.clone(), chat, audio, telephony);
    Harness {
        app: create_router(state),
        sessions,
        llm,
    }
}

fn twilio_config() -> TwilioConfig {
    TwilioConfig {
        account_sid: "AC123".to_string(),
        auth_token: "auth-token".to_string(),
        phone_number: "+815011112222".to_string(),
        api_key: None,
        api_secret: None,
        app_sid: Some("AP456".to_string()),
    }
}

/// Local stand-in for the Twilio REST API; records the `Url` of every
/// call update it receives.
async fn spawn_twilio_stub() -> (String, Arc<Mutex<Vec<(String, String)>>>) {
    let redirects = Arc::new(Mutex::new(Vec::new()));
    let recorded = redirects.clone();
    let stub = Router::new().route(
        "/2010-04-01/Accounts/:account/Calls/:call",
        post(
            move |Path((_, call)): Path<(String, String)>,
                  Form(form): Form<HashMap<String, String>>| {
                let recorded = recorded.clone();
                async move {
                    let sid = call.trim_end_matches(".json").to_string();
                    recorded
                        .lock()
                        .unwrap()
                        .push((sid.clone(), form.get("Url").cloned().unwrap_or_default()));
                    Json(serde_json::json!({ "sid": sid, "status": "in-progress" }))
                }
            },
        ),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, stub).await.unwrap();
    });
    (format!("http://{addr}/2010-04-01"), redirects)
}

fn harness() -> Harness {
    harness_with(test_config(Some("+819000000000")), None)
}

fn speech_form(call_sid: &str, text: &str, confidence: &str) -> String {
    serde_urlencoded::to_string(&[
        ("CallSid", call_sid),
        ("SpeechResult", text),
        ("Confidence", confidence),
    ])
    .unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, header::HeaderMap, String) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn post_form(app: &Router, uri: &str, body: &str) -> (StatusCode, header::HeaderMap, String) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, req).await
}

async fn get(app: &Router, uri: &str) -> (StatusCode, header::HeaderMap, String) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, req).await
}

// ============================================================
// Voice webhooks
// ============================================================

#[tokio::test]
async fn test_initial_call_greets_and_gathers() {
    let h = harness();

    let (status, headers, body) = post_form(&h.app, "/api/twilio/voice", "CallSid=CA1").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "text/xml; charset=utf-8");
    assert_eq!(
        headers[header::CACHE_CONTROL],
        "no-cache, no-store, must-revalidate"
    );
    assert_eq!(body.matches("<Say").count(), 2);
    assert!(body.contains("<Gather"));
    assert!(body.contains(
        "https://voice.example.com/api/twilio/voice/response?step=second_response"
    ));

    let session = h.sessions.snapshot("CA1").unwrap();
    assert_eq!(session.marker, ProgressMarker::SecondResponse);
    assert_eq!(session.transcript.len(), 2);
    assert!(session
        .transcript
        .iter()
        .all(|turn| turn.speaker == Speaker::System));
}

#[tokio::test]
async fn test_entry_webhook_accepts_get() {
    let h = harness();

    let (status, _, body) = get(&h.app, "/api/twilio/voice").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("step=second_response"));
}

#[tokio::test]
async fn test_rejection_hangs_up() {
    let h = harness();

    let (_, _, body) = post_form(
        &h.app,
        "/api/twilio/voice/response?step=check_availability",
        &speech_form("CA2", "結構です、お断りします", "0.92"),
    )
    .await;

    assert!(body.contains("<Hangup/>"));
    assert!(!body.contains("<Gather"));

    let turns = h.sessions.get("CA2");
    assert_eq!(turns[0].speaker, Speaker::Caller);
    assert_eq!(turns[0].text, "結構です、お断りします");
}

#[tokio::test]
async fn test_low_confidence_reasks_same_step() {
    let h = harness();

    let (_, _, body) = post_form(
        &h.app,
        "/api/twilio/voice/response?step=check_availability",
        &speech_form("CA3", "お願いします", "0.21"),
    )
    .await;

    assert!(body.contains("step=check_availability"));
    assert_eq!(h.sessions.snapshot("CA3").unwrap().retries, 1);
}

#[tokio::test]
async fn test_repeated_reasks_escalate_to_operator() {
    let h = harness();
    let uri = "/api/twilio/voice/response?step=check_availability";
    let form = speech_form("CA4", "えーと", "0.9");

    for _ in 0..3 {
        let (_, _, body) = post_form(&h.app, uri, &form).await;
        assert!(body.contains("<Gather"));
    }
    let (_, _, body) = post_form(&h.app, uri, &form).await;

    assert!(body.contains("<Redirect"));
    assert!(body.contains("https://voice.example.com/api/twilio/voice/operator"));
    assert_eq!(h.sessions.snapshot("CA4").unwrap().retries, 0);
}

#[tokio::test]
async fn test_handoff_without_operator_hangs_up() {
    let h = harness_with(test_config(None), None);

    let (_, _, body) = post_form(
        &h.app,
        "/api/twilio/voice/response?step=check_availability",
        &speech_form("CA5", "はい、お願いします", "0.9"),
    )
    .await;

    assert!(!body.contains("<Redirect"));
    assert!(body.contains("<Hangup/>"));
}

#[tokio::test]
async fn test_unknown_step_falls_back() {
    let h = harness();

    let (status, _, body) = post_form(
        &h.app,
        "/api/twilio/voice/response?step=no_such_step",
        &speech_form("CA6", "もしもし", "0.9"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("申し訳"));
    assert!(body.contains("step=check_availability"));
}

#[tokio::test]
async fn test_malformed_body_uses_defaults() {
    let h = harness();
    let req = Request::builder()
        .method("POST")
        .uri("/api/twilio/voice/response")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not a form"))
        .unwrap();

    let (status, _, body) = send(&h.app, req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.matches("<Say").count(), 2);
    assert!(body.contains("step=second_response"));
}

#[tokio::test]
async fn test_assistant_step_speaks_model_reply() {
    let h = harness();
    h.llm.queue_reply("明日は晴れの予報です。");

    let (_, _, body) = post_form(
        &h.app,
        "/api/twilio/voice/response?step=assistant",
        &speech_form("CA7", "明日の天気は？", "0.88"),
    )
    .await;

    assert!(body.contains("明日は晴れの予報です。"));
    assert!(body.contains("step=assistant"));

    let turns = h.sessions.get("CA7");
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1].speaker, Speaker::System);
    assert_eq!(h.llm.recorded_requests().len(), 1);
}

#[tokio::test]
async fn test_assistant_step_apologizes_when_model_fails() {
    let h = harness();

    let (_, _, body) = post_form(
        &h.app,
        "/api/twilio/voice/response?step=assistant",
        &speech_form("CA8", "こんにちは", "0.9"),
    )
    .await;

    assert!(body.contains(CHAT_FALLBACK));
}

#[tokio::test]
async fn test_synthesized_audio_is_played() {
    let dir = tempfile::tempdir().unwrap();
    let audio = AudioCache::new(Arc::new(MockSpeechService::new()), dir.path(), BASE_URL);
    let h = harness_with(test_config(None), Some(audio));

    let (_, _, body) = post_form(&h.app, "/api/twilio/voice", "CallSid=CA9").await;

    assert_eq!(body.matches("<Play>").count(), 2);
    assert!(body.contains("https://voice.example.com/audio/"));
    assert!(!body.contains("<Say"));
}

#[tokio::test]
async fn test_synthesis_failure_falls_back_to_say() {
    let dir = tempfile::tempdir().unwrap();
    let audio = AudioCache::new(Arc::new(MockSpeechService::failing()), dir.path(), BASE_URL);
    let h = harness_with(test_config(None), Some(audio));

    let (_, _, body) = post_form(&h.app, "/api/twilio/voice", "CallSid=CA10").await;

    assert_eq!(body.matches("<Say").count(), 2);
    assert!(!body.contains("<Play>"));
}

#[tokio::test]
async fn test_prompts_synthesize_concurrently() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(MockSpeechService::new().with_delay(Duration::from_millis(50)));
    let audio = AudioCache::new(service.clone(), dir.path(), BASE_URL);
    let h = harness_with(test_config(None), Some(audio));

    let (_, _, body) = post_form(&h.app, "/api/twilio/voice", "CallSid=CA16").await;

    assert_eq!(body.matches("<Play>").count(), 2);
    assert_eq!(service.calls(), 2);
    assert_eq!(service.max_in_flight(), 2);
}

#[tokio::test]
async fn test_slow_synthesis_falls_back_to_say() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(MockSpeechService::new().with_delay(Duration::from_secs(5)));
    let audio = AudioCache::new(service, dir.path(), BASE_URL);
    let mut config = test_config(None);
    config.synthesis_budget = Duration::from_millis(20);
    let h = harness_with(config, Some(audio));

    let (status, _, body) = post_form(&h.app, "/api/twilio/voice", "CallSid=CA17").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.matches("<Say").count(), 2);
    assert!(!body.contains("<Play>"));
    assert!(body.contains("<Gather"));
}

// ============================================================
// Operator handoff
// ============================================================

#[tokio::test]
async fn test_operator_dials_configured_number() {
    let h = harness();

    let (status, _, body) = post_form(&h.app, "/api/twilio/voice/operator", "CallSid=CA11").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<Dial"));
    assert!(body.contains("+819000000000"));
    assert!(body.contains("record-from-answer"));
}

#[tokio::test]
async fn test_operator_requires_call_sid() {
    let h = harness();

    let (status, _, _) = post_form(&h.app, "/api/twilio/voice/operator", "").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_operator_without_number_is_server_error() {
    let h = harness_with(test_config(None), None);

    let (status, _, body) =
        post_form(&h.app, "/api/twilio/voice/operator", "CallSid=CA12").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert!(json["error"].as_str().unwrap().contains("Operator"));
}

#[tokio::test]
async fn test_connect_operator_rings_browser_client() {
    let mut config = test_config(None);
    config.twilio = Some(twilio_config());
    let h = harness_with(config, None);

    let (status, headers, body) =
        post_form(&h.app, "/api/twilio/voice/connect/operator", "CallSid=CA18").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "text/xml; charset=utf-8");
    assert!(body.contains(r#"callerId="+815011112222""#));
    assert!(body.contains(r#"timeout="180""#));
    assert!(body.contains(r#"answerOnBridge="true""#));
    assert!(body.contains(">operator</Client></Dial>"));
    assert!(body.contains(
        r#"statusCallback="https://voice.example.com/api/twilio/status""#
    ));
}

#[tokio::test]
async fn test_web_call_announces_then_dials_client() {
    let h = harness();

    let (status, _, body) =
        post_form(&h.app, "/api/twilio/voice/web-call", "CallSid=CA19").await;

    assert_eq!(status, StatusCode::OK);
    let say = body.find("ウェブコールに切り替えます。少々お待ちください。").unwrap();
    let dial = body.find("<Dial").unwrap();
    assert!(say < dial);
    assert!(body.contains(">human_operator</Client>"));
    assert!(body.contains(r#"statusCallbackEvent="initiated ringing answered completed""#));
    assert!(body.contains(r#"statusCallbackMethod="POST""#));

    let turns = h.sessions.get("CA19");
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].speaker, Speaker::System);
}

#[tokio::test]
async fn test_web_call_requires_call_sid() {
    let h = harness();

    let (status, _, _) = post_form(&h.app, "/api/twilio/voice/web-call", "").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ============================================================
// Call lifecycle and call control
// ============================================================

#[tokio::test]
async fn test_completed_status_evicts_session() {
    let h = harness();
    post_form(&h.app, "/api/twilio/voice", "CallSid=CA13").await;
    assert!(h.sessions.snapshot("CA13").is_some());

    let (status, _, _) = post_form(
        &h.app,
        "/api/twilio/status",
        "CallSid=CA13&CallStatus=completed&CallDuration=42",
    )
    .await;

    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(h.sessions.snapshot("CA13").is_none());
}

#[tokio::test]
async fn test_ringing_status_keeps_session() {
    let h = harness();
    post_form(&h.app, "/api/twilio/voice", "CallSid=CA14").await;

    let (status, _, _) =
        post_form(&h.app, "/api/twilio/status", "CallSid=CA14&CallStatus=ringing").await;

    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(h.sessions.snapshot("CA14").is_some());
}

#[tokio::test]
async fn test_create_call_without_twilio_is_server_error() {
    let h = harness();
    let req = Request::builder()
        .method("POST")
        .uri("/api/twilio/call")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"to":"+819012345678"}"#))
        .unwrap();

    let (status, _, body) = send(&h.app, req).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("\"error\""));
}

#[tokio::test]
async fn test_call_status_requires_sid() {
    let h = harness();

    let (status, _, _) = get(&h.app, "/api/twilio/call/status").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_intervene_redirects_to_operator_client() {
    let (api_base, redirects) = spawn_twilio_stub().await;
    let client = TwilioClient::new(
        "AC123".into(),
        "auth-token".into(),
        "+815011112222".into(),
        Duration::from_secs(5),
    )
    .unwrap()
    .with_api_base(api_base);
    // No operator number: the browser client takes the call.
    let h = harness_with_telephony(test_config(None), None, Some(client));

    let req = Request::builder()
        .method("POST")
        .uri("/api/twilio/call/CA20/intervene")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&h.app, req).await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(
        *redirects.lock().unwrap(),
        vec![(
            "CA20".to_string(),
            "https://voice.example.com/api/twilio/voice/connect/operator".to_string()
        )]
    );
}

#[tokio::test]
async fn test_intervene_without_twilio_is_server_error() {
    let h = harness();
    let req = Request::builder()
        .method("POST")
        .uri("/api/twilio/call/CA21/intervene")
        .body(Body::empty())
        .unwrap();

    let (status, _, _) = send(&h.app, req).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_token_grants_browser_voice() {
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

    let mut config = test_config(None);
    config.twilio = Some(twilio_config());
    let h = harness_with(config, None);

    let (status, _, body) = get(&h.app, "/api/twilio/token").await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    let token = json["token"].as_str().unwrap();

    let key = DecodingKey::from_secret(b"auth-token");
    let claims = decode::<serde_json::Value>(token, &key, &Validation::new(Algorithm::HS256))
        .unwrap()
        .claims;
    assert_eq!(claims["sub"], "AC123");
    assert_eq!(claims["grants"]["identity"], "ai-call-user");
    assert_eq!(claims["grants"]["voice"]["incoming"]["allow"], true);
    assert_eq!(
        claims["grants"]["voice"]["outgoing"]["application_sid"],
        "AP456"
    );
}

#[tokio::test]
async fn test_token_without_twilio_is_server_error() {
    let h = harness();

    let (status, _, body) = get(&h.app, "/api/twilio/token").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("\"error\""));
}

#[tokio::test]
async fn test_transcript_endpoint() {
    let h = harness();
    post_form(&h.app, "/api/twilio/voice", "CallSid=CA15").await;

    let (status, _, body) = get(&h.app, "/api/calls/CA15/transcript").await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["call_id"], "CA15");
    assert_eq!(json["marker"], "second_response");
    assert_eq!(json["turns"].as_array().unwrap().len(), 2);

    let (status, _, _) = get(&h.app, "/api/calls/CA-unknown/transcript").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================
// Speech synthesis
// ============================================================

#[tokio::test]
async fn test_tts_requires_text() {
    let h = harness();

    let (status, _, _) = get(&h.app, "/api/tts").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_tts_without_synthesis_is_server_error() {
    let h = harness();

    let (status, _, _) = get(&h.app, "/api/tts?text=hello").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_tts_returns_audio_and_serves_cached_clip() {
    let dir = tempfile::tempdir().unwrap();
    let audio = AudioCache::new(Arc::new(MockSpeechService::new()), dir.path(), BASE_URL);
    let h = harness_with(test_config(None), Some(audio));

    let (status, headers, body) = get(&h.app, "/api/tts?text=hello").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "audio/mpeg");
    assert_eq!(body, "ID3hello");

    let clip = format!("/audio/{}", crate::speech::cache_key("hello"));
    let (status, _, body) = get(&h.app, &clip).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ID3hello");
}

#[tokio::test]
async fn test_version() {
    let h = harness();

    let (status, _, body) = get(&h.app, "/version").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with("callscript "));
}
