//! Access tokens for the browser voice client
//!
//! Twilio access tokens are HS256 JWTs with a `twilio-fpa;v=1` content type
//! and a `grants` claim naming the client identity and its voice permissions.

use crate::config::TwilioConfig;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Identity the operator's browser client registers as
pub const CLIENT_IDENTITY: &str = "ai-call-user";

const TOKEN_CONTENT_TYPE: &str = "twilio-fpa;v=1";
const DEFAULT_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
#[error("failed to sign access token: {0}")]
pub struct TokenError(#[from] jsonwebtoken::errors::Error);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub jti: String,
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub grants: Grants,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grants {
    pub identity: String,
    pub voice: VoiceGrant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceGrant {
    pub incoming: IncomingGrant,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outgoing: Option<OutgoingGrant>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingGrant {
    pub allow: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingGrant {
    pub application_sid: String,
}

/// Signs voice access tokens for one Twilio account
pub struct VoiceTokenIssuer {
    account_sid: String,
    key_sid: String,
    encoding_key: EncodingKey,
    app_sid: Option<String>,
    ttl: Duration,
}

impl VoiceTokenIssuer {
    pub fn new(twilio: &TwilioConfig) -> Self {
        let (key_sid, secret) = match (&twilio.api_key, &twilio.api_secret) {
            (Some(key), Some(secret)) => (key, secret),
            _ => (&twilio.account_sid, &twilio.auth_token),
        };

        Self {
            account_sid: twilio.account_sid.clone(),
            key_sid: key_sid.clone(),
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            app_sid: twilio.app_sid.clone(),
            ttl: DEFAULT_TTL,
        }
    }

    /// Token letting `identity` receive calls and, with an app configured,
    /// place them.
    pub fn issue(&self, identity: &str) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);

        let claims = AccessTokenClaims {
            jti: format!("{}-{now}", self.key_sid),
            iss: self.key_sid.clone(),
            sub: self.account_sid.clone(),
            iat: now,
            exp: now.saturating_add(ttl),
            grants: Grants {
                identity: identity.to_string(),
                voice: VoiceGrant {
                    incoming: IncomingGrant { allow: true },
                    outgoing: self.app_sid.clone().map(|application_sid| OutgoingGrant {
                        application_sid,
                    }),
                },
            },
        };

        let mut header = Header::new(Algorithm::HS256);
        header.cty = Some(TOKEN_CONTENT_TYPE.to_string());
        header.kid = Some(self.key_sid.clone());

        Ok(encode(&header, &claims, &self.encoding_key)?)
    }
}
