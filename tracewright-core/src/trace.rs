//! Trace validation: whole-conversation rules that gate save/submit.
//!
//! Every check runs and every violation is collected. Violations come out in
//! turn-then-chunk traversal order with metadata violations last, so callers
//! can assert on them deterministically.

use std::fmt;

use serde::Serialize;

use crate::models::{ChunkBody, ChunkKind, Metadata, Role, Turn};
use crate::validation::validate_metadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    EmptyTrace,
    FirstTurnNotUser,
    LastTurnNotAssistant,
    EmptyTurn,
    EmptyChunk,
    MissingToolName,
    MissingToolResult,
    OrphanToolResult,
    ToolChunkInUserTurn,
    MissingUserText,
    MultipleUserText,
    Metadata,
}

/// One rule failure. `turn` and `chunk` are 0-based; the message is 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub turn: Option<usize>,
    pub chunk: Option<usize>,
    pub message: String,
}

impl Violation {
    fn trace(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            turn: None,
            chunk: None,
            message: message.into(),
        }
    }

    fn turn(kind: ViolationKind, turn: usize, detail: &str) -> Self {
        Self {
            kind,
            turn: Some(turn),
            chunk: None,
            message: format!("Turn {}: {}", turn + 1, detail),
        }
    }

    fn chunk(kind: ViolationKind, turn: usize, chunk: usize, detail: &str) -> Self {
        Self {
            kind,
            turn: Some(turn),
            chunk: Some(chunk),
            message: format!("Turn {}, chunk {}: {}", turn + 1, chunk + 1, detail),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Turn-level rules only (no metadata).
pub fn validate_turns(turns: &[Turn]) -> Vec<Violation> {
    let mut violations = Vec::new();

    let (Some(first), Some(last)) = (turns.first(), turns.last()) else {
        violations.push(Violation::trace(
            ViolationKind::EmptyTrace,
            "Conversation must have at least one turn",
        ));
        return violations;
    };

    if first.role != Role::User {
        violations.push(Violation::trace(
            ViolationKind::FirstTurnNotUser,
            "First turn must be from the user",
        ));
    }
    if last.role != Role::Assistant {
        violations.push(Violation::trace(
            ViolationKind::LastTurnNotAssistant,
            "Last turn must be from the assistant",
        ));
    }

    for (t, turn) in turns.iter().enumerate() {
        if turn.chunks.is_empty() {
            violations.push(Violation::turn(
                ViolationKind::EmptyTurn,
                t,
                "turn has no content chunks",
            ));
            continue;
        }

        for (c, chunk) in turn.chunks.iter().enumerate() {
            if chunk.content().trim().is_empty() {
                violations.push(Violation::chunk(
                    ViolationKind::EmptyChunk,
                    t,
                    c,
                    "content cannot be empty",
                ));
            }

            match &chunk.body {
                ChunkBody::ToolCall { tool_name, .. } => {
                    if tool_name.trim().is_empty() {
                        violations.push(Violation::chunk(
                            ViolationKind::MissingToolName,
                            t,
                            c,
                            "tool call is missing a tool name",
                        ));
                    }
                    let answered = turn
                        .chunks
                        .get(c + 1)
                        .is_some_and(|next| next.kind() == ChunkKind::ToolResult);
                    if !answered {
                        violations.push(Violation::chunk(
                            ViolationKind::MissingToolResult,
                            t,
                            c,
                            "tool call needs an execution result",
                        ));
                    }
                }
                ChunkBody::ToolResult { .. } => {
                    let paired = c
                        .checked_sub(1)
                        .and_then(|p| turn.chunks.get(p))
                        .is_some_and(|prev| prev.kind() == ChunkKind::ToolCall);
                    if !paired {
                        violations.push(Violation::chunk(
                            ViolationKind::OrphanToolResult,
                            t,
                            c,
                            "tool result has no preceding tool call",
                        ));
                    }
                }
                ChunkBody::Text { .. } => {}
            }

            if turn.role == Role::User && chunk.kind() != ChunkKind::Text {
                violations.push(Violation::chunk(
                    ViolationKind::ToolChunkInUserTurn,
                    t,
                    c,
                    "user turns cannot contain tool chunks",
                ));
            }
        }

        if turn.role == Role::User {
            let texts = turn
                .chunks
                .iter()
                .filter(|chunk| chunk.kind() == ChunkKind::Text)
                .count();
            if texts == 0 {
                violations.push(Violation::turn(
                    ViolationKind::MissingUserText,
                    t,
                    "user turn must have a text chunk",
                ));
            } else if texts > 1 {
                violations.push(Violation::turn(
                    ViolationKind::MultipleUserText,
                    t,
                    "user turn has multiple text chunks (only one allowed)",
                ));
            }
        }
    }

    violations
}

/// Full validation: turn rules followed by metadata rules.
pub fn validate_trace(turns: &[Turn], metadata: &Metadata) -> Vec<Violation> {
    let mut violations = validate_turns(turns);
    let meta = validate_metadata(&metadata.name, &metadata.description);
    violations.extend(
        meta.errors
            .into_iter()
            .map(|message| Violation::trace(ViolationKind::Metadata, message)),
    );
    violations
}
