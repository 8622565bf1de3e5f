//! Message rendering: turn state to markdown, plus length-limited splitting.
//!
//! Everything here is a pure function of its inputs. The delivery layer
//! decides when to render; this module decides what the text looks like and
//! how an over-long body is cut into chunks without breaking fenced code
//! blocks.

use std::time::Duration;

use crate::agent::translate::{Action, ActionKind, ActionPhase};

/// Marker appended to an in-progress streaming preview.
pub const CURSOR: &str = "▌";
/// Substituted by callers when a final answer renders to nothing.
pub const EMPTY_PLACEHOLDER: &str = "(no reply)";
/// A chunk may exceed the caller's max by this much: a closing fence plus a
/// reopened fence header. Callers pass a max comfortably below the hard
/// platform limit.
pub const FENCE_SLACK: usize = 16;

/// Render the in-progress view of a turn: status header, finished step
/// notes, action lines, then the streaming preview.
pub fn render_progress(
    elapsed: Duration,
    notes: &[String],
    actions: &[String],
    preview: Option<&str>,
) -> String {
    let mut sections: Vec<String> = vec![format!("⚙️ working ({})", fmt_elapsed(elapsed))];
    for note in notes {
        if !note.trim().is_empty() {
            sections.push(note.trim().to_string());
        }
    }
    if !actions.is_empty() {
        sections.push(actions.join("\n"));
    }
    if let Some(text) = preview {
        if !text.is_empty() {
            sections.push(text.to_string());
        }
    }
    sections.join("\n\n")
}

/// One action line for the progress view.
pub fn action_line(action: &Action, phase: ActionPhase, ok: Option<bool>) -> String {
    let marker = match (phase, ok) {
        (ActionPhase::Started, _) => "▸",
        (ActionPhase::Completed, Some(false)) => "✗",
        (ActionPhase::Completed, _) => "✓",
    };
    let label = match action.kind {
        ActionKind::Command => format!("$ {}", action.title),
        ActionKind::FileChange => format!("edit {}", action.title),
        ActionKind::WebSearch => format!("search {}", action.title),
        ActionKind::Subagent => format!("agent {}", action.title),
        ActionKind::Tool => action.title.clone(),
    };
    format!("{marker} {label}")
}

/// Bound the visible tail of in-progress text and append the cursor.
///
/// Window slides over the tail, not the head: the newest text is what the
/// user wants to watch.
pub fn preview_tail(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return format!("{text}{CURSOR}");
    }
    let tail: String = text
        .chars()
        .skip(total - max_chars)
        .collect();
    format!("…{tail}{CURSOR}")
}

/// Elapsed time in a compact human form: `42s`, `3m07s`.
pub fn fmt_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else {
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}

/// Split `body` into ordered chunks of at most `max_chars` characters
/// (plus [`FENCE_SLACK`] and the continued marker, see below).
///
/// - A body that already fits yields exactly one chunk, trimmed.
/// - An empty or whitespace-only body yields no chunks.
/// - Paragraph boundaries (blank lines) are the preferred split points;
///   single lines, then raw character runs, are the fallbacks.
/// - A fenced code block that would straddle a split is closed at the end
///   of the chunk and reopened with the same fence header in the next one.
/// - Chunks after the first get a `(continued i/N)` marker line.
pub fn split_chunks(body: &str, max_chars: usize) -> Vec<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if char_len(trimmed) <= max_chars {
        return vec![trimmed.to_string()];
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut open_fence: Option<String> = None;

    for (piece, paragraph_break) in segments(trimmed, max_chars) {
        let sep = if current.is_empty() {
            ""
        } else if paragraph_break {
            "\n\n"
        } else {
            "\n"
        };
        if !current.is_empty() && char_len(&current) + sep.len() + char_len(&piece) > max_chars {
            // Close out the chunk, balancing any open fence.
            if open_fence.is_some() {
                current.push_str("\n```");
            }
            chunks.push(current);
            current = match &open_fence {
                Some(header) => format!("{header}\n{piece}"),
                None => piece.clone(),
            };
        } else {
            current.push_str(sep);
            current.push_str(&piece);
        }
        track_fences(&piece, &mut open_fence);
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    let total = chunks.len();
    if total > 1 {
        for (i, chunk) in chunks.iter_mut().enumerate().skip(1) {
            *chunk = format!("(continued {}/{})\n\n{chunk}", i + 1, total);
        }
    }
    chunks
}

/// Cut the body into packable pieces, each at most `max_chars` long.
/// Returns (piece, starts-a-new-paragraph).
fn segments(body: &str, max_chars: usize) -> Vec<(String, bool)> {
    let mut out = Vec::new();
    for paragraph in body.split("\n\n") {
        if paragraph.trim().is_empty() {
            continue;
        }
        let mut first_of_paragraph = true;
        if char_len(paragraph) <= max_chars {
            out.push((paragraph.to_string(), true));
            continue;
        }
        for line in paragraph.split('\n') {
            if char_len(line) <= max_chars {
                out.push((line.to_string(), first_of_paragraph));
                first_of_paragraph = false;
            } else {
                // A single line longer than the limit: hard-split by chars.
                let mut run = String::new();
                for ch in line.chars() {
                    run.push(ch);
                    if char_len(&run) == max_chars {
                        out.push((std::mem::take(&mut run), first_of_paragraph));
                        first_of_paragraph = false;
                    }
                }
                if !run.is_empty() {
                    out.push((run, first_of_paragraph));
                    first_of_paragraph = false;
                }
            }
        }
    }
    out
}

/// Toggle fence state for each fence line in `piece`, remembering the
/// opening header so a split can reopen with the same language marker.
fn track_fences(piece: &str, open_fence: &mut Option<String>) {
    for line in piece.split('\n') {
        let t = line.trim_start();
        if t.starts_with("```") {
            *open_fence = match open_fence {
                Some(_) => None,
                None => Some(t.trim_end().to_string()),
            };
        }
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
