//! Per-call session store
//!
//! Holds the progress marker, retry count and transcript for every live call.
//! Sessions are created lazily on first write and evicted when the provider
//! reports the call finished or when they sit idle for too long.

use crate::dialog::ProgressMarker;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Who spoke a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Caller,
    System,
}

/// One utterance in a call transcript
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl Turn {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

/// State kept for one call
#[derive(Debug, Clone, Serialize)]
pub struct CallSession {
    pub call_id: String,
    pub marker: ProgressMarker,
    pub retries: u32,
    pub transcript: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CallSession {
    fn new(call_id: &str) -> Self {
        let now = Utc::now();
        Self {
            call_id: call_id.to_string(),
            marker: ProgressMarker::Initial,
            retries: 0,
            transcript: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Storage for call sessions
///
/// Every method is atomic with respect to a single call id.
pub trait SessionStore: Send + Sync {
    /// Transcript for a call in the order it was appended; empty if unseen
    fn get(&self, call_id: &str) -> Vec<Turn>;

    /// Append a turn, creating the session if needed
    fn append(&self, call_id: &str, speaker: Speaker, text: &str);

    /// Full copy of a session
    fn snapshot(&self, call_id: &str) -> Option<CallSession>;

    /// Record where the call moved to and its retry count
    fn advance(&self, call_id: &str, marker: ProgressMarker, retries: u32);

    /// Drop a session, returning it if it existed
    fn evict(&self, call_id: &str) -> Option<CallSession>;

    /// Drop every session untouched for longer than `max_idle`; returns how many
    fn evict_idle(&self, max_idle: Duration) -> usize;
}

/// Default transcript bound per call
pub const DEFAULT_MAX_TURNS: usize = 64;

/// Process-local session store
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, CallSession>>,
    max_turns: usize,
}

impl InMemorySessionStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_turns: max_turns.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CallSession>> {
        // Poisoning is ignored; every write leaves the map consistent
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURNS)
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, call_id: &str) -> Vec<Turn> {
        self.lock()
            .get(call_id)
            .map(|session| session.transcript.clone())
            .unwrap_or_default()
    }

    fn append(&self, call_id: &str, speaker: Speaker, text: &str) {
        let mut sessions = self.lock();
        let session = sessions
            .entry(call_id.to_string())
            .or_insert_with(|| CallSession::new(call_id));

        let turn = Turn::new(speaker, text);
        let now = turn.at;
        session.transcript.push(turn);
        if session.transcript.len() > self.max_turns {
            let excess = session.transcript.len() - self.max_turns;
            session.transcript.drain(..excess);
        }
        session.updated_at = now;
    }

    fn snapshot(&self, call_id: &str) -> Option<CallSession> {
        self.lock().get(call_id).cloned()
    }

    fn advance(&self, call_id: &str, marker: ProgressMarker, retries: u32) {
        let mut sessions = self.lock();
        let session = sessions
            .entry(call_id.to_string())
            .or_insert_with(|| CallSession::new(call_id));
        session.marker = marker;
        session.retries = retries;
        session.updated_at = Utc::now();
    }

    fn evict(&self, call_id: &str) -> Option<CallSession> {
        self.lock().remove(call_id)
    }

    fn evict_idle(&self, max_idle: Duration) -> usize {
        let Ok(max_idle) = chrono::Duration::from_std(max_idle) else {
            return 0;
        };
        let cutoff = Utc::now() - max_idle;

        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, session| session.updated_at >= cutoff);
        before - sessions.len()
    }
}
