//! Session-scoped conversational state and the response cache.
//!
//! Both stores are TTL-bound in-process key-value maps. A session is
//! `Active` while its TTL holds and logically gone afterwards: reads of an
//! expired session behave as if it never existed, and the next write starts
//! a fresh one. The response cache runs on its own, shorter TTL and is
//! keyed by a normalized query fingerprint.
//!
//! Appends to one session are serialized by the store lock, so concurrent
//! turns land in arrival order.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::synthesis::{SourceRef, SynthesisResult};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One conversation turn. Append-only; never mutated after insertion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub sources: Vec<SourceRef>,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            sources: Vec::new(),
            confidence: 0.0,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>, sources: Vec<SourceRef>, confidence: f32) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            sources,
            confidence,
            timestamp: Utc::now(),
        }
    }
}

/// Listing entry for the operator-facing session overview.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub turn_count: usize,
}

struct SessionEntry {
    turns: Vec<Turn>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    expires_at: Instant,
}

impl SessionEntry {
    fn fresh(ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            turns: Vec::new(),
            created_at: now,
            last_activity: now,
            expires_at: Instant::now() + ttl,
        }
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// TTL-bound store of conversation histories.
pub struct SessionStore {
    ttl: Duration,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Appends a turn, implicitly creating the session (or replacing an
    /// expired one) and refreshing its TTL.
    pub fn append_turn(&self, session_id: &str, turn: Turn) {
        let mut sessions = self.sessions.lock();
        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry::fresh(self.ttl));
        if entry.expired() {
            *entry = SessionEntry::fresh(self.ttl);
        }
        entry.turns.push(turn);
        entry.last_activity = Utc::now();
        entry.expires_at = Instant::now() + self.ttl;
    }

    /// Conversation history in causal order; expired or unknown sessions
    /// read as empty.
    pub fn history(&self, session_id: &str) -> Vec<Turn> {
        let mut sessions = self.sessions.lock();
        match sessions.get(session_id) {
            Some(entry) if !entry.expired() => entry.turns.clone(),
            Some(_) => {
                // Lazy expiry: drop the dead entry on first read past TTL.
                sessions.remove(session_id);
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    /// Explicitly removes a session. Returns whether a live session existed.
    pub fn clear(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.remove(session_id) {
            Some(entry) => !entry.expired(),
            None => false,
        }
    }

    /// Live sessions that have at least one turn, most recently active
    /// first.
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.lock();
        let mut summaries: Vec<SessionSummary> = sessions
            .iter()
            .filter(|(_, entry)| !entry.expired() && !entry.turns.is_empty())
            .map(|(id, entry)| SessionSummary {
                session_id: id.clone(),
                created_at: entry.created_at,
                last_activity: entry.last_activity,
                turn_count: entry.turns.len(),
            })
            .collect();
        summaries.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        summaries
    }

    /// Active sweep for expired sessions; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, entry| !entry.expired());
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, "purged expired sessions");
        }
        removed
    }
}

struct CacheEntry {
    response: SynthesisResult,
    expires_at: Instant,
}

/// Short-TTL cache of synthesized responses.
///
/// A hit returns a clone of the stored result, so repeated questions get
/// an answer identical to the original computation without touching the
/// retrieval or generation paths.
pub struct ResponseCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Normalizes a query into its cache key: lowercased, whitespace
    /// collapsed, trailing punctuation trimmed, optionally scoped to a
    /// session.
    pub fn fingerprint(query: &str, session_scope: Option<&str>) -> String {
        static WHITESPACE: OnceLock<Regex> = OnceLock::new();
        let re = WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern"));

        let normalized = re.replace_all(query.trim(), " ").to_lowercase();
        let normalized = normalized.trim_end_matches(['?', '!', '.', ' ']);
        match session_scope {
            Some(scope) => format!("{scope}|{normalized}"),
            None => normalized.to_string(),
        }
    }

    pub fn get(&self, key: &str) -> Option<SynthesisResult> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if Instant::now() < entry.expires_at => Some(entry.response.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, response: SynthesisResult) {
        let mut entries = self.entries.lock();
        entries.insert(
            key,
            CacheEntry {
                response,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, entry| now < entry.expires_at);
        before - entries.len()
    }
}
