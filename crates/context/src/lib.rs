//! Conversation context management for aula.
//!
//! Bounds the history that reaches the model: the most recent turns are kept
//! verbatim, older turns are compressed into a rolling summary that replaces
//! the previous one. Summarization failures degrade to last-K with no
//! summary — never a failed turn.

pub mod pruner;
pub mod token;

pub use pruner::{ContextPruner, PrunedContext};
