//! Raw agent events: one JSON object per line on the agent's stdout.
//!
//! The wire shape is loose and evolves with the agent CLI, so everything
//! past the `type` discriminator stays an opaque `serde_json::Value` that
//! the translator probes. Malformed lines are reported to the caller, who
//! logs and skips them; a bad line never aborts the stream.

use serde_json::Value;

/// A single decoded line from the agent's output stream.
///
/// Consumed exactly once by [`StreamState::apply`](super::translate::StreamState::apply).
#[derive(Debug, Clone)]
pub struct RawAgentEvent {
    /// The `type` discriminator: `step_start`, `step_finish`, `tool_use`,
    /// `text`, `error`, or something newer we ignore.
    pub kind: String,
    /// Session identifier, when the event carries one.
    pub session_id: Option<String>,
    /// Type-dependent payload. Events that nest their payload under `part`
    /// get that object; flat events get the whole line object, so the
    /// translator can probe either shape with the same code.
    pub part: Value,
}

/// Error describing why a line could not become a [`RawAgentEvent`].
#[derive(Debug, thiserror::Error)]
pub enum EventParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("event has no string `type` field")]
    MissingType,
}

impl RawAgentEvent {
    /// Parse one NDJSON line.
    pub fn parse(line: &str) -> Result<Self, EventParseError> {
        let value: Value = serde_json::from_str(line)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(EventParseError::MissingType)?
            .to_string();

        let session_id = ["sessionID", "session_id", "sessionId"]
            .iter()
            .find_map(|key| value.get(*key).and_then(Value::as_str))
            .map(str::to_string);

        let part = value.get("part").cloned().unwrap_or(value);

        Ok(Self {
            kind,
            session_id,
            part,
        })
    }

    /// String field lookup on the payload.
    pub fn part_str(&self, key: &str) -> Option<&str> {
        self.part.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_flat_event() {
        let ev = RawAgentEvent::parse(r#"{"type":"text","text":"hi"}"#).unwrap();
        assert_eq!(ev.kind, "text");
        assert_eq!(ev.session_id, None);
        assert_eq!(ev.part_str("text"), Some("hi"));
    }

    #[test]
    fn parse_nested_part() {
        let ev = RawAgentEvent::parse(
            r#"{"type":"tool_use","sessionID":"s1","part":{"id":"call_1","tool":"bash"}}"#,
        )
        .unwrap();
        assert_eq!(ev.kind, "tool_use");
        assert_eq!(ev.session_id.as_deref(), Some("s1"));
        assert_eq!(ev.part_str("tool"), Some("bash"));
    }

    #[test]
    fn session_id_aliases() {
        for raw in [
            r#"{"type":"step_start","sessionID":"s"}"#,
            r#"{"type":"step_start","session_id":"s"}"#,
            r#"{"type":"step_start","sessionId":"s"}"#,
        ] {
            let ev = RawAgentEvent::parse(raw).unwrap();
            assert_eq!(ev.session_id.as_deref(), Some("s"), "line: {raw}");
        }
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            RawAgentEvent::parse("not json"),
            Err(EventParseError::Json(_))
        ));
    }

    #[test]
    fn missing_type_is_an_error() {
        assert!(matches!(
            RawAgentEvent::parse(r#"{"part":{}}"#),
            Err(EventParseError::MissingType)
        ));
        // Non-string `type` counts as missing too.
        assert!(matches!(
            RawAgentEvent::parse(r#"{"type":7}"#),
            Err(EventParseError::MissingType)
        ));
    }
}
