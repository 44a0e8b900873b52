//! Groundline Context Engine
//!
//! The per-turn conversational pipeline:
//! - Session memory over checkpoint persistence
//! - Follow-up question rewriting
//! - Grounding block and citation assembly
//! - Grounded answer generation with a fixed refusal path
//! - The orchestrator running the fixed stage sequence

pub mod assembler;
pub mod pipeline;
pub mod responder;
pub mod rewriter;
pub mod session_store;

pub use assembler::{AssembledContext, Citation, ContextAssembler, GroundingBlock};
pub use pipeline::{PipelineOrchestrator, Stage, TurnRequest, TurnResponse, TurnStatus};
pub use responder::{
    GroundedResponder, GroundedResponse, ResponseKind, GENERATION_FAILURE_MESSAGE,
    REFUSAL_MESSAGE, SOURCES_HEADING,
};
pub use rewriter::QueryRewriter;
pub use session_store::{SessionGuard, SessionStore};
