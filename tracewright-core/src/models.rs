//! Trace data model: turns made of typed content chunks.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::ValidationResult;

pub type ChunkId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Text,
    ToolCall,
    ToolResult,
}

/// Chunk payload. Each kind carries exactly the fields it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChunkBody {
    Text {
        content: String,
    },
    ToolCall {
        content: String,
        tool_name: String,
        tool_id: Uuid,
    },
    ToolResult {
        content: String,
    },
}

impl ChunkBody {
    pub fn kind(&self) -> ChunkKind {
        match self {
            ChunkBody::Text { .. } => ChunkKind::Text,
            ChunkBody::ToolCall { .. } => ChunkKind::ToolCall,
            ChunkBody::ToolResult { .. } => ChunkKind::ToolResult,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            ChunkBody::Text { content }
            | ChunkBody::ToolCall { content, .. }
            | ChunkBody::ToolResult { content } => content,
        }
    }

    pub(crate) fn content_mut(&mut self) -> &mut String {
        match self {
            ChunkBody::Text { content }
            | ChunkBody::ToolCall { content, .. }
            | ChunkBody::ToolResult { content } => content,
        }
    }

    pub fn tool_name(&self) -> Option<&str> {
        match self {
            ChunkBody::ToolCall { tool_name, .. } => Some(tool_name),
            _ => None,
        }
    }

    pub fn tool_id(&self) -> Option<Uuid> {
        match self {
            ChunkBody::ToolCall { tool_id, .. } => Some(*tool_id),
            _ => None,
        }
    }
}

/// Where a chunk returns to when an execution fails or is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeState {
    Editing,
    Executed,
}

impl From<ResumeState> for ChunkState {
    fn from(resume: ResumeState) -> Self {
        match resume {
            ResumeState::Editing => ChunkState::Editing,
            ResumeState::Executed => ChunkState::Executed,
        }
    }
}

/// Chunk lifecycle. Only the transition functions in [`crate::chunk`] change it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkState {
    #[default]
    Empty,
    Editing,
    /// A tool_call with one execution in flight, identified by `attempt`.
    Executing { attempt: u64, resume: ResumeState },
    Executed,
}

impl ChunkState {
    pub fn is_executing(&self) -> bool {
        matches!(self, ChunkState::Executing { .. })
    }
}

/// A remote execution failure attached to the tool_call that triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub message: String,
    pub retryable: bool,
}

/// One content unit of a turn.
///
/// Only `id` and `body` are persisted; state and annotations are recomputed
/// on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    #[serde(flatten)]
    pub(crate) body: ChunkBody,
    #[serde(skip)]
    pub(crate) state: ChunkState,
    #[serde(skip)]
    pub(crate) validation: ValidationResult,
    #[serde(skip)]
    pub(crate) failure: Option<ExecutionFailure>,
}

impl Chunk {
    pub fn body(&self) -> &ChunkBody {
        &self.body
    }

    pub fn kind(&self) -> ChunkKind {
        self.body.kind()
    }

    pub fn content(&self) -> &str {
        self.body.content()
    }

    pub fn state(&self) -> ChunkState {
        self.state
    }

    pub fn validation(&self) -> &ValidationResult {
        &self.validation
    }

    pub fn failure(&self) -> Option<&ExecutionFailure> {
        self.failure.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub chunks: Vec<Chunk>,
}

impl Turn {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            chunks: Vec::new(),
        }
    }

    pub fn position(&self, id: ChunkId) -> Option<usize> {
        self.chunks.iter().position(|c| c.id == id)
    }
}

/// Example name, description and tags.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_serializes_flat_with_type_tag() {
        let tool_id = Uuid::new_v4();
        let chunk = Chunk {
            id: Uuid::new_v4(),
            body: ChunkBody::ToolCall {
                content: "print(1)".to_string(),
                tool_name: "python".to_string(),
                tool_id,
            },
            state: ChunkState::Executed,
            validation: ValidationResult::valid(),
            failure: None,
        };

        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["type"], "tool_call");
        assert_eq!(json["content"], "print(1)");
        assert_eq!(json["tool_name"], "python");
        assert_eq!(json["tool_id"], tool_id.to_string());
        assert!(json.get("state").is_none());

        let back: Chunk = serde_json::from_value(json).unwrap();
        assert_eq!(back.body, chunk.body);
        assert_eq!(back.state, ChunkState::Empty);
    }

    #[test]
    fn test_text_chunk_has_no_tool_name() {
        let json = serde_json::json!({
            "id": Uuid::new_v4(),
            "type": "text",
            "content": "hello",
        });
        let chunk: Chunk = serde_json::from_value(json).unwrap();
        assert_eq!(chunk.kind(), ChunkKind::Text);
        assert_eq!(chunk.body().tool_name(), None);
    }
}
