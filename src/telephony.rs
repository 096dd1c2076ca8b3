//! Twilio REST client for call control
//!
//! Only the three operations the service needs: place an outbound call,
//! look up a call's status, and redirect a live call to new TwiML. Browser
//! access tokens are signed locally in [`token`].

mod token;

pub use token::{VoiceTokenIssuer, CLIENT_IDENTITY};

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// Status callback events requested for outbound calls
const STATUS_EVENTS: [&str; 4] = ["initiated", "ringing", "answered", "completed"];

#[derive(Debug, Error)]
pub enum TelephonyError {
    #[error("request to Twilio failed: {0}")]
    Request(String),
    #[error("Twilio returned HTTP {status}: {message}")]
    Api {
        status: u16,
        code: Option<i64>,
        message: String,
    },
    #[error("unexpected Twilio response: {0}")]
    Parse(String),
}

/// Authenticated client for one Twilio account
pub struct TwilioClient {
    client: Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
    api_base: String,
}

impl TwilioClient {
    pub fn new(
        account_sid: String,
        auth_token: String,
        from_number: String,
        timeout: Duration,
    ) -> Result<Self, TelephonyError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TelephonyError::Request(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            account_sid,
            auth_token,
            from_number,
            api_base: DEFAULT_API_BASE.to_string(),
        })
    }

    #[cfg(test)]
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Number outbound calls are placed from
    pub fn from_number(&self) -> &str {
        &self.from_number
    }

    fn calls_url(&self) -> String {
        format!("{}/Accounts/{}/Calls.json", self.api_base, self.account_sid)
    }

    fn call_url(&self, call_sid: &str) -> String {
        format!(
            "{}/Accounts/{}/Calls/{call_sid}.json",
            self.api_base, self.account_sid
        )
    }

    /// Place an outbound call; returns the new call SID.
    pub async fn create_call(
        &self,
        to: &str,
        twiml_url: &str,
        status_callback: &str,
    ) -> Result<String, TelephonyError> {
        let form = create_call_form(to, &self.from_number, twiml_url, status_callback);
        let call: CallResource = self
            .send(self.client.post(self.calls_url()).form(&form))
            .await?;
        Ok(call.sid)
    }

    /// Current status of a call (`queued`, `ringing`, `in-progress`, ...)
    pub async fn fetch_call_status(&self, call_sid: &str) -> Result<String, TelephonyError> {
        let call: CallResource = self.send(self.client.get(self.call_url(call_sid))).await?;
        Ok(call.status)
    }

    /// Point a live call at new TwiML
    pub async fn redirect_call(&self, call_sid: &str, twiml_url: &str) -> Result<(), TelephonyError> {
        let form = [("Url", twiml_url), ("Method", "POST")];
        let _: CallResource = self
            .send(self.client.post(self.call_url(call_sid)).form(&form))
            .await?;
        Ok(())
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, TelephonyError> {
        let response = request
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await
            .map_err(|e| TelephonyError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TelephonyError::Request(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(api_error(status.as_u16(), &body));
        }

        serde_json::from_str(&body).map_err(|e| TelephonyError::Parse(format!("{e} - body: {body}")))
    }
}

fn create_call_form<'a>(
    to: &'a str,
    from: &'a str,
    twiml_url: &'a str,
    status_callback: &'a str,
) -> Vec<(&'static str, &'a str)> {
    let mut form = vec![
        ("To", to),
        ("From", from),
        ("Url", twiml_url),
        ("Method", "POST"),
        ("StatusCallback", status_callback),
        ("StatusCallbackMethod", "POST"),
    ];
    form.extend(STATUS_EVENTS.iter().map(|event| ("StatusCallbackEvent", *event)));
    form
}

fn api_error(status: u16, body: &str) -> TelephonyError {
    match serde_json::from_str::<TwilioErrorBody>(body) {
        Ok(err) => TelephonyError::Api {
            status,
            code: err.code,
            message: err.message,
        },
        Err(_) => TelephonyError::Api {
            status,
            code: None,
            message: body.to_string(),
        },
    }
}

#[derive(Debug, Deserialize)]
struct CallResource {
    sid: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct TwilioErrorBody {
    #[serde(default)]
    code: Option<i64>,
    message: String,
}
