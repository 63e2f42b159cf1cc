//! Turn-level streaming events.
//!
//! The orchestrator emits these over an mpsc channel; the HTTP gateway
//! forwards `Delta` text into the response body. Metadata (conversation id,
//! provider, cache hit) travels out-of-band in the `TurnResponse`, never
//! interleaved with the text.

use serde::{Deserialize, Serialize};

/// Events emitted while a turn streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Partial answer text.
    Delta { text: String },

    /// The turn finished and bookkeeping ran.
    Done,

    /// The stream terminated abnormally. No restart follows.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_serialization() {
        let event = TurnEvent::Delta {
            text: "Hola".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"delta""#));
        assert!(json.contains("Hola"));
    }

    #[test]
    fn error_roundtrip() {
        let json = r#"{"type":"error","message":"boom"}"#;
        let event: TurnEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, TurnEvent::Error { message } if message == "boom"));
    }
}
