//! Event translation: raw agent stream events to domain lifecycle events.
//!
//! The agent CLI emits loosely-typed NDJSON; this module is the one place
//! that understands its shapes. One [`RawAgentEvent`] plus the turn's
//! [`StreamState`] yields zero or more [`DomainEvent`]s. No I/O, no clocks:
//! deterministic and side-effect-free beyond mutating the passed-in state.

use std::collections::HashMap;

use serde_json::Value;

use super::event::RawAgentEvent;
use super::session::ResumeToken;

/// Command titles are cut to this many characters in action lines.
const COMMAND_TITLE_MAX: usize = 80;
/// Tool output carried in action detail is cut to this many characters.
const OUTPUT_PREVIEW_MAX: usize = 200;
/// Error text when an `error` event carries no usable message.
const DEFAULT_ERROR: &str = "agent reported an error";

/// What kind of work a tool invocation represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Command,
    Tool,
    FileChange,
    WebSearch,
    Subagent,
}

/// Lifecycle phase of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionPhase {
    Started,
    Completed,
}

/// One tool invocation, as shown to the user.
#[derive(Debug, Clone)]
pub struct Action {
    /// The agent's tool-call identifier.
    pub id: String,
    pub kind: ActionKind,
    /// Human-readable line: a command, a file path, a query.
    pub title: String,
    /// Order in which the action first appeared within the turn.
    pub seq: u64,
    /// Kind-specific data: command text, file path, output preview, exit code.
    pub detail: HashMap<String, String>,
}

/// A translated, engine-agnostic lifecycle event.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// The turn is underway and the session is resumable. At most one per turn.
    Started {
        resume: ResumeToken,
        model: Option<String>,
    },
    /// A tool invocation started or finished.
    Action {
        action: Action,
        phase: ActionPhase,
        /// `Some(false)` when the tool failed; only set on `Completed`.
        ok: Option<bool>,
    },
    /// A streaming text delta, with the step's full accumulated text.
    Text { delta: String, accumulated: String },
    /// A step's text ended because the agent is about to call tools.
    TextFinished { text: String },
    /// The turn's terminal event. Exactly one per turn.
    Completed {
        ok: bool,
        answer: String,
        resume: Option<ResumeToken>,
        error: Option<String>,
    },
}

/// Mutable per-turn translation state. Owned exclusively by one turn.
pub struct StreamState {
    engine: String,
    /// In-flight actions by tool-call id.
    actions: HashMap<String, Action>,
    /// Text accumulated since the last tool-call step boundary.
    text: String,
    /// Monotonic counter ordering actions and finished-text notes.
    note_seq: u64,
    /// First-seen session identifier. Sticky: never overwritten.
    session_id: Option<String>,
    started_emitted: bool,
    step_finished: bool,
    finished: bool,
}

impl StreamState {
    pub fn new(engine: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            actions: HashMap::new(),
            text: String::new(),
            note_seq: 0,
            session_id: None,
            started_emitted: false,
            step_finished: false,
            finished: false,
        }
    }

    /// The resume token for the turn, once a session id has been seen.
    pub fn resume_token(&self) -> Option<ResumeToken> {
        self.session_id.as_ref().map(|session| ResumeToken {
            engine: self.engine.clone(),
            session: session.clone(),
        })
    }

    /// Whether a terminal `Completed` has been produced.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether a `step_finish` has been observed this turn.
    pub fn step_finish_observed(&self) -> bool {
        self.step_finished
    }

    /// Translate one raw event into domain events.
    pub fn apply(&mut self, event: &RawAgentEvent) -> Vec<DomainEvent> {
        if self.finished {
            return Vec::new();
        }

        // Session id is sticky: the first one seen on any event wins.
        if self.session_id.is_none() {
            if let Some(session) = &event.session_id {
                self.session_id = Some(session.clone());
            }
        }

        match event.kind.as_str() {
            "step_start" => self.on_step_start(event),
            "tool_use" => self.on_tool_use(event),
            "text" => self.on_text(event),
            "step_finish" => self.on_step_finish(event),
            "error" => self.on_error(event),
            _ => Vec::new(),
        }
    }

    fn on_step_start(&mut self, event: &RawAgentEvent) -> Vec<DomainEvent> {
        if self.started_emitted {
            return Vec::new();
        }
        let Some(resume) = self.resume_token() else {
            // No session id anywhere in the turn yet: never emit Started.
            return Vec::new();
        };
        self.started_emitted = true;
        let model = event.part_str("model").map(str::to_string);
        vec![DomainEvent::Started { resume, model }]
    }

    fn on_tool_use(&mut self, event: &RawAgentEvent) -> Vec<DomainEvent> {
        let Some(id) = tool_call_id(&event.part).map(str::to_string) else {
            return Vec::new();
        };
        let tool = event
            .part_str("tool")
            .or_else(|| event.part_str("name"))
            .unwrap_or("tool")
            .to_string();
        let state = event.part.get("state").unwrap_or(&event.part);
        let status = state.get("status").and_then(Value::as_str).unwrap_or("");
        let input = state.get("input").cloned().unwrap_or(Value::Null);

        match status {
            "pending" => {
                let (kind, inferred_title) = classify_tool(&tool, &input);
                // An explicit title from the tool state always wins.
                let title = state
                    .get("title")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or(inferred_title);
                self.note_seq += 1;
                let mut detail = HashMap::new();
                if let Some(command) = input.get("command").and_then(Value::as_str) {
                    detail.insert("command".into(), command.to_string());
                }
                if let Some(path) = input_path(&input) {
                    detail.insert("path".into(), path.to_string());
                }
                let action = Action {
                    id: id.clone(),
                    kind,
                    title,
                    seq: self.note_seq,
                    detail,
                };
                self.actions.insert(id, action.clone());
                vec![DomainEvent::Action {
                    action,
                    phase: ActionPhase::Started,
                    ok: None,
                }]
            }
            "completed" => {
                let mut action = self.take_or_synthesize(&id, &tool, &input);
                let exit = state
                    .get("metadata")
                    .and_then(|m| m.get("exit"))
                    .or_else(|| state.get("exit"))
                    .and_then(Value::as_i64);
                let ok = exit.map_or(true, |code| code == 0);
                if let Some(code) = exit {
                    action.detail.insert("exit".into(), code.to_string());
                }
                if let Some(output) = state.get("output").and_then(Value::as_str) {
                    action
                        .detail
                        .insert("output".into(), truncate_chars(output, OUTPUT_PREVIEW_MAX));
                }
                self.actions.insert(id, action.clone());
                vec![DomainEvent::Action {
                    action,
                    phase: ActionPhase::Completed,
                    ok: Some(ok),
                }]
            }
            "error" => {
                let mut action = self.take_or_synthesize(&id, &tool, &input);
                let message = state
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("tool failed");
                action.detail.insert("error".into(), message.to_string());
                self.actions.insert(id, action.clone());
                vec![DomainEvent::Action {
                    action,
                    phase: ActionPhase::Completed,
                    ok: Some(false),
                }]
            }
            _ => Vec::new(),
        }
    }

    fn on_text(&mut self, event: &RawAgentEvent) -> Vec<DomainEvent> {
        let Some(delta) = event.part.get("text").and_then(Value::as_str) else {
            return Vec::new();
        };
        if delta.is_empty() {
            return Vec::new();
        }
        self.text.push_str(delta);
        vec![DomainEvent::Text {
            delta: delta.to_string(),
            accumulated: self.text.clone(),
        }]
    }

    fn on_step_finish(&mut self, event: &RawAgentEvent) -> Vec<DomainEvent> {
        self.step_finished = true;
        let reason = ["finishReason", "finish_reason", "reason"]
            .iter()
            .find_map(|key| event.part_str(key))
            .unwrap_or("");

        match reason {
            "tool-calls" => {
                if self.text.is_empty() {
                    return Vec::new();
                }
                // The next step's text starts from a clean slate.
                let text = std::mem::take(&mut self.text);
                self.note_seq += 1;
                vec![DomainEvent::TextFinished { text }]
            }
            "stop" => {
                self.finished = true;
                vec![DomainEvent::Completed {
                    ok: true,
                    answer: self.text.clone(),
                    resume: self.resume_token(),
                    error: None,
                }]
            }
            _ => Vec::new(),
        }
    }

    fn on_error(&mut self, event: &RawAgentEvent) -> Vec<DomainEvent> {
        self.finished = true;
        let message = event
            .part
            .get("data")
            .and_then(|data| data.get("message"))
            .and_then(Value::as_str)
            .or_else(|| event.part_str("message"))
            .or_else(|| event.part_str("name"))
            .unwrap_or(DEFAULT_ERROR);
        vec![DomainEvent::Completed {
            ok: false,
            answer: self.text.clone(),
            resume: self.resume_token(),
            error: Some(message.to_string()),
        }]
    }

    /// Pull the in-flight action for `id`, or build one when a completion
    /// arrives without a preceding pending event.
    fn take_or_synthesize(&mut self, id: &str, tool: &str, input: &Value) -> Action {
        if let Some(action) = self.actions.get(id) {
            return action.clone();
        }
        let (kind, title) = classify_tool(tool, input);
        self.note_seq += 1;
        Action {
            id: id.to_string(),
            kind,
            title,
            seq: self.note_seq,
            detail: HashMap::new(),
        }
    }
}

/// One ordered classification rule: probe the tool name and input, produce a
/// kind and a title if the rule matches. New tool kinds are added by
/// appending a rule here, not by branching deeper.
type KindRule = fn(&str, &Value) -> Option<(ActionKind, String)>;

const KIND_RULES: &[KindRule] = &[
    rule_path_bearing,
    rule_command,
    rule_web_search,
    rule_subagent,
];

fn classify_tool(tool: &str, input: &Value) -> (ActionKind, String) {
    for rule in KIND_RULES {
        if let Some(classified) = rule(tool, input) {
            return classified;
        }
    }
    (ActionKind::Tool, tool.to_string())
}

/// Path-bearing input: a write/edit/create tool is a file change, anything
/// else touching a path is a plain tool.
fn rule_path_bearing(tool: &str, input: &Value) -> Option<(ActionKind, String)> {
    let path = input_path(input)?;
    let lowered = tool.to_ascii_lowercase();
    let kind = if ["write", "edit", "create"]
        .iter()
        .any(|verb| lowered.contains(verb))
    {
        ActionKind::FileChange
    } else {
        ActionKind::Tool
    };
    Some((kind, path.to_string()))
}

fn rule_command(_tool: &str, input: &Value) -> Option<(ActionKind, String)> {
    let command = input.get("command").and_then(Value::as_str)?;
    Some((
        ActionKind::Command,
        truncate_chars(command, COMMAND_TITLE_MAX),
    ))
}

fn rule_web_search(tool: &str, input: &Value) -> Option<(ActionKind, String)> {
    let lowered = tool.to_ascii_lowercase();
    if !lowered.contains("search") && !lowered.contains("web") {
        return None;
    }
    let title = input
        .get("query")
        .and_then(Value::as_str)
        .unwrap_or(tool)
        .to_string();
    Some((ActionKind::WebSearch, title))
}

fn rule_subagent(tool: &str, input: &Value) -> Option<(ActionKind, String)> {
    let lowered = tool.to_ascii_lowercase();
    if !lowered.contains("task") && !lowered.contains("agent") {
        return None;
    }
    let title = input
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or(tool)
        .to_string();
    Some((ActionKind::Subagent, title))
}

fn tool_call_id(part: &Value) -> Option<&str> {
    ["callID", "call_id", "id"]
        .iter()
        .find_map(|key| part.get(*key).and_then(Value::as_str))
        .filter(|id| !id.is_empty())
}

fn input_path(input: &Value) -> Option<&str> {
    ["filePath", "file_path", "path"]
        .iter()
        .find_map(|key| input.get(*key).and_then(Value::as_str))
        .filter(|path| !path.is_empty())
}

/// Cut `s` at a char boundary, marking the cut with an ellipsis.
fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    format!("{cut}…")
}
