//! Query-time entry point for gateway collaborators.
//!
//! `ChatService::ask` is the operation behind `POST /chat`: it resolves the
//! session, consults the response cache, retrieves grounding, synthesizes
//! an answer, and appends both turns to the session — in that order. The
//! whole call is a plain future; a caller that disconnects simply drops it,
//! abandoning any in-flight provider call.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::retrieval::Retriever;
use crate::session::{ResponseCache, SessionStore, SessionSummary, Turn};
use crate::synthesis::{SynthesisResult, Synthesizer};
use crate::types::RagResult;

/// Canned reply for greetings and messages too short to retrieve on.
pub const GREETING_ANSWER: &str = "Hello! I'm a news assistant. Ask me about current events, \
     recent coverage, or any specific news story.";

const GREETINGS: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "good morning",
    "good afternoon",
    "good evening",
];

/// The JSON-shaped response a gateway renders to the user.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<crate::synthesis::SourceRef>,
    pub confidence: f32,
    pub session_id: String,
}

/// Ties sessions, cache, retrieval, and synthesis into the chat operation.
pub struct ChatService {
    retriever: Retriever,
    synthesizer: Synthesizer,
    sessions: Arc<SessionStore>,
    cache: Arc<ResponseCache>,
    /// When set, cache entries are scoped per session instead of shared.
    scope_cache_to_session: bool,
}

impl ChatService {
    pub fn new(
        retriever: Retriever,
        synthesizer: Synthesizer,
        sessions: Arc<SessionStore>,
        cache: Arc<ResponseCache>,
    ) -> Self {
        Self {
            retriever,
            synthesizer,
            sessions,
            cache,
            scope_cache_to_session: false,
        }
    }

    /// Scopes response-cache entries to the asking session.
    #[must_use]
    pub fn with_session_scoped_cache(mut self) -> Self {
        self.scope_cache_to_session = true;
        self
    }

    /// Answers `message` within the given session, creating one if absent.
    ///
    /// Retrieval and generation failures propagate with their error kind so
    /// the gateway can present a meaningful message; session and cache
    /// state never fails the request.
    pub async fn ask(&self, session_id: Option<String>, message: &str) -> RagResult<ChatResponse> {
        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let trimmed = message.trim();

        if is_greeting(trimmed) {
            let result = SynthesisResult {
                answer: GREETING_ANSWER.to_string(),
                sources: Vec::new(),
                confidence: 1.0,
            };
            self.record_exchange(&session_id, trimmed, &result);
            return Ok(self.to_response(session_id, result));
        }

        let scope = self
            .scope_cache_to_session
            .then_some(session_id.as_str());
        let cache_key = ResponseCache::fingerprint(trimmed, scope);

        let result = match self.cache.get(&cache_key) {
            Some(cached) => {
                debug!(session = %session_id, "response cache hit");
                cached
            }
            None => {
                let history = self.sessions.history(&session_id);
                let hits = self.retriever.retrieve(trimmed).await?;
                let result = self.synthesizer.synthesize(trimmed, &hits, &history).await?;
                self.cache.put(cache_key, result.clone());
                result
            }
        };

        self.record_exchange(&session_id, trimmed, &result);
        info!(
            session = %session_id,
            confidence = result.confidence,
            sources = result.sources.len(),
            "chat turn answered"
        );
        Ok(self.to_response(session_id, result))
    }

    /// Conversation history for a session; expired sessions read as empty.
    pub fn history(&self, session_id: &str) -> Vec<Turn> {
        self.sessions.history(session_id)
    }

    /// Explicitly clears a session.
    pub fn clear_session(&self, session_id: &str) -> bool {
        self.sessions.clear(session_id)
    }

    /// Live sessions with at least one turn.
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        self.sessions.list_sessions()
    }

    fn record_exchange(&self, session_id: &str, message: &str, result: &SynthesisResult) {
        self.sessions.append_turn(session_id, Turn::user(message));
        self.sessions.append_turn(
            session_id,
            Turn::assistant(
                result.answer.clone(),
                result.sources.clone(),
                result.confidence,
            ),
        );
    }

    fn to_response(&self, session_id: String, result: SynthesisResult) -> ChatResponse {
        ChatResponse {
            answer: result.answer,
            sources: result.sources,
            confidence: result.confidence,
            session_id,
        }
    }
}

fn is_greeting(message: &str) -> bool {
    if message.chars().count() < 3 {
        return true;
    }
    let lowered = message.to_lowercase();
    GREETINGS.contains(&lowered.as_str())
}
