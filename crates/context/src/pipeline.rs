//! Per-turn pipeline orchestration
//!
//! Every turn runs the same fixed stage sequence:
//!
//! ```text
//! Start -> Rewritten -> Retrieved -> Assembled -> Responded -> Persisted
//! ```
//!
//! Retrieval is unconditional. The session lock is held from load to
//! save, so turns of one session never interleave.

use crate::assembler::{AssembledContext, Citation, ContextAssembler};
use crate::responder::{GroundedResponder, GroundedResponse, ResponseKind};
use crate::rewriter::QueryRewriter;
use crate::session_store::SessionStore;
use groundline_common::errors::{AppError, Result};
use groundline_common::metrics;
use groundline_common::models::Turn;
use groundline_search::{RetrievalResult, Retriever};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, Span};

/// Returned to the caller when the turn could not be saved
pub const PERSISTENCE_FAILURE_MESSAGE: &str =
    "Your message could not be saved, so this turn was not recorded. Please try again.";

/// Pipeline stage, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    Rewritten,
    Retrieved,
    Assembled,
    Responded,
    Persisted,
}

impl Stage {
    /// The only stage allowed to follow this one
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Start => Some(Stage::Rewritten),
            Stage::Rewritten => Some(Stage::Retrieved),
            Stage::Retrieved => Some(Stage::Assembled),
            Stage::Assembled => Some(Stage::Responded),
            Stage::Responded => Some(Stage::Persisted),
            Stage::Persisted => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::Rewritten => "rewrite",
            Stage::Retrieved => "retrieve",
            Stage::Assembled => "assemble",
            Stage::Responded => "respond",
            Stage::Persisted => "persist",
        }
    }
}

/// Transient state of one turn.
///
/// `None` means the producing stage has not run yet, which is distinct
/// from a stage that ran and produced an empty value.
#[derive(Debug)]
pub struct PipelineState {
    stage: Stage,
    stage_started: Instant,
    raw_query: String,
    rewritten_query: Option<String>,
    retrieval: Option<RetrievalResult>,
    context: Option<AssembledContext>,
    response: Option<GroundedResponse>,
}

impl PipelineState {
    pub fn new(raw_query: impl Into<String>) -> Self {
        Self {
            stage: Stage::Start,
            stage_started: Instant::now(),
            raw_query: raw_query.into(),
            rewritten_query: None,
            retrieval: None,
            context: None,
            response: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn raw_query(&self) -> &str {
        &self.raw_query
    }

    pub fn rewritten_query(&self) -> Option<&str> {
        self.rewritten_query.as_deref()
    }

    pub fn retrieval(&self) -> Option<&RetrievalResult> {
        self.retrieval.as_ref()
    }

    pub fn context(&self) -> Option<&AssembledContext> {
        self.context.as_ref()
    }

    pub fn response(&self) -> Option<&GroundedResponse> {
        self.response.as_ref()
    }

    /// Citations of the assembled context, empty before assembly
    pub fn citations(&self) -> &[Citation] {
        self.context.as_ref().map(|c| c.citations()).unwrap_or_default()
    }

    /// Move to `to`, which must directly follow the current stage
    fn advance(&mut self, to: Stage) -> Result<()> {
        if self.stage.next() != Some(to) {
            return Err(AppError::Internal {
                message: format!(
                    "illegal stage transition {:?} -> {:?}",
                    self.stage, to
                ),
            });
        }

        metrics::record_stage(to.as_str(), self.stage_started.elapsed().as_secs_f64());
        self.stage = to;
        self.stage_started = Instant::now();
        Ok(())
    }

    pub fn record_rewrite(&mut self, query: String) -> Result<()> {
        self.advance(Stage::Rewritten)?;
        self.rewritten_query = Some(query);
        Ok(())
    }

    pub fn record_retrieval(&mut self, result: RetrievalResult) -> Result<()> {
        self.advance(Stage::Retrieved)?;
        self.retrieval = Some(result);
        Ok(())
    }

    pub fn record_context(&mut self, context: AssembledContext) -> Result<()> {
        self.advance(Stage::Assembled)?;
        self.context = Some(context);
        Ok(())
    }

    pub fn record_response(&mut self, response: GroundedResponse) -> Result<()> {
        self.advance(Stage::Responded)?;
        self.response = Some(response);
        Ok(())
    }

    pub fn mark_persisted(&mut self) -> Result<()> {
        self.advance(Stage::Persisted)
    }
}

/// One user turn
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnRequest {
    pub user_input: String,

    /// Existing session to continue; a new one is allocated when absent
    #[serde(default)]
    pub session_id: Option<String>,

    /// Readable prefix for newly allocated session ids
    #[serde(default)]
    pub user_hint: Option<String>,
}

impl TurnRequest {
    pub fn new(user_input: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            ..Self::default()
        }
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.user_hint = Some(hint.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    Success,
    Error,
}

/// Outcome of one turn as seen by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResponse {
    pub status: TurnStatus,
    pub response: String,
    pub session_id: String,

    /// The answer was generated from at least one retrieved chunk
    pub used_retrieval: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,

    #[serde(default)]
    pub citations: Vec<Citation>,
}

impl TurnResponse {
    pub fn is_success(&self) -> bool {
        self.status == TurnStatus::Success
    }
}

/// Runs turns through the fixed stage sequence
pub struct PipelineOrchestrator {
    sessions: Arc<SessionStore>,
    rewriter: QueryRewriter,
    retriever: Arc<Retriever>,
    assembler: ContextAssembler,
    responder: GroundedResponder,
}

impl PipelineOrchestrator {
    pub fn new(
        sessions: Arc<SessionStore>,
        rewriter: QueryRewriter,
        retriever: Arc<Retriever>,
        responder: GroundedResponder,
    ) -> Self {
        Self {
            sessions,
            rewriter,
            retriever,
            assembler: ContextAssembler::new(),
            responder,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Handle one turn, allocating a session id when none is given.
    ///
    /// Rewrite, retrieval, and generation failures are recovered inside
    /// the pipeline; only a failed save produces an error status, and the
    /// previous checkpoint is left as it was.
    #[instrument(skip(self, request), fields(session_id = tracing::field::Empty))]
    pub async fn handle(&self, request: TurnRequest) -> TurnResponse {
        let session_id = match request.session_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => id,
            None => self.sessions.create_session(request.user_hint.as_deref()),
        };
        Span::current().record("session_id", session_id.as_str());

        match self.run_turn(&session_id, &request.user_input).await {
            Ok(state) => {
                let kind = state.response().map(|r| r.kind);
                metrics::record_turn(kind.map(|k| k.as_str()).unwrap_or("unknown"));

                let used_retrieval = kind == Some(ResponseKind::Grounded);
                let citations = state.citations().to_vec();
                let response = state.response.map(|r| r.text).unwrap_or_default();

                TurnResponse {
                    status: TurnStatus::Success,
                    response,
                    session_id,
                    used_retrieval,
                    error_detail: None,
                    citations,
                }
            }
            Err(e) => {
                error!(error = %e, "Turn failed");
                metrics::record_turn("error");

                TurnResponse {
                    status: TurnStatus::Error,
                    response: PERSISTENCE_FAILURE_MESSAGE.to_string(),
                    session_id,
                    used_retrieval: false,
                    error_detail: Some(e.to_string()),
                    citations: Vec::new(),
                }
            }
        }
    }

    /// Run every stage for one turn and return the final state
    pub async fn run_turn(&self, session_id: &str, user_input: &str) -> Result<PipelineState> {
        let _guard = self.sessions.lock(session_id).await;
        let session = self.sessions.load(session_id).await;
        let mut state = PipelineState::new(user_input);

        let rewritten = self
            .rewriter
            .rewrite(user_input, session.recent(self.rewriter.history_turns()))
            .await;
        state.record_rewrite(rewritten)?;

        let query = state.rewritten_query().unwrap_or(user_input);
        let retrieval = self.retriever.retrieve(query).await;
        state.record_retrieval(retrieval)?;

        let context = match state.retrieval() {
            Some(result) => self.assembler.assemble(result),
            None => AssembledContext::NoResults,
        };
        state.record_context(context)?;

        let response = match state.context() {
            Some(context) => {
                self.responder
                    .respond(user_input, session.turns(), context)
                    .await
            }
            None => {
                self.responder
                    .respond(user_input, session.turns(), &AssembledContext::NoResults)
                    .await
            }
        };
        state.record_response(response)?;

        let answer = state.response().map(|r| r.text.clone()).unwrap_or_default();
        let updated = session.with_exchange(Turn::user(user_input), Turn::assistant(answer));
        self.sessions.save(&updated).await?;
        state.mark_persisted()?;

        info!(
            session_id,
            turns = updated.len(),
            chunks = state.retrieval().map(RetrievalResult::len).unwrap_or(0),
            kind = state.response().map(|r| r.kind.as_str()).unwrap_or("unknown"),
            "Turn complete"
        );

        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_sequence() {
        let mut stage = Stage::Start;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            seen.push(next);
            stage = next;
        }
        assert_eq!(
            seen,
            vec![
                Stage::Start,
                Stage::Rewritten,
                Stage::Retrieved,
                Stage::Assembled,
                Stage::Responded,
                Stage::Persisted
            ]
        );
    }

    #[test]
    fn test_state_rejects_skipped_stage() {
        let mut state = PipelineState::new("q");
        assert!(state.record_retrieval(RetrievalResult::empty()).is_err());
        assert_eq!(state.stage(), Stage::Start);
        assert!(state.retrieval().is_none());

        state.record_rewrite("q".to_string()).unwrap();
        state.record_retrieval(RetrievalResult::empty()).unwrap();
        assert_eq!(state.stage(), Stage::Retrieved);
        assert!(state.retrieval().is_some_and(RetrievalResult::is_empty));
    }

    #[test]
    fn test_state_rejects_repeated_stage() {
        let mut state = PipelineState::new("q");
        state.record_rewrite("q".to_string()).unwrap();
        assert!(state.record_rewrite("again".to_string()).is_err());
        assert_eq!(state.rewritten_query(), Some("q"));
    }

    #[test]
    fn test_turn_response_serialization() {
        let response = TurnResponse {
            status: TurnStatus::Success,
            response: "ok".to_string(),
            session_id: "s1".to_string(),
            used_retrieval: true,
            error_detail: None,
            citations: vec![Citation {
                source: "Thesis".to_string(),
                page: Some(1),
            }],
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["citations"][0]["page"], 1);
        assert!(json.get("error_detail").is_none());
    }
}
