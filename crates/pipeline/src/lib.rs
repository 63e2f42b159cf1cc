//! The aula chat-turn orchestration pipeline.
//!
//! Composes the guard, router, cache, pruner, retriever, tool registry, and
//! model gateway into one request/response cycle with exactly-once
//! bookkeeping. See `orchestrator` for the turn state machine.

pub mod cache;
pub mod events;
pub mod guard;
pub mod orchestrator;
pub mod router;

pub use cache::ResponseCache;
pub use events::TurnEvent;
pub use guard::{GuardDecision, SessionGuard};
pub use orchestrator::{ChatTurnOrchestrator, TurnRequest, TurnResponse};
pub use router::{Intent, IntentRouter, RouteDecision};
