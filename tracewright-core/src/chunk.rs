//! Chunk state machine.
//!
//! ```text
//!   Empty ──edit──▶ Editing ──begin_execution──▶ Executing ──success──▶ Executed
//!                      ▲                             │                     │
//!                      └──────failure / cancel───────┘◀──begin_execution───┘
//! ```
//!
//! tool_result chunks are created directly in `Executed` as a side effect of
//! a successful tool_call execution. A chunk holds at most one in-flight
//! execution; completions are matched against the `attempt` stored in the
//! `Executing` state so late or cancelled results are dropped.

use thiserror::Error;
use uuid::Uuid;

use crate::analyzer::analyze;
use crate::models::{
    Chunk, ChunkBody, ChunkId, ChunkKind, ChunkState, ExecutionFailure, ResumeState,
};
use crate::validation::{validate_content, ValidationResult};

/// Why an execute request was refused. Refusals leave the chunk untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecuteRejection {
    #[error("only tool_call chunks can be executed")]
    NotAToolCall,

    #[error("an execution is already in flight for this chunk")]
    AlreadyExecuting,

    #[error("code cannot be empty")]
    EmptyCode,

    #[error("tool call is missing a tool name")]
    MissingToolName,

    #[error("code has {count} syntax error(s)")]
    InvalidCode { count: usize },

    #[error("chunk {position} of this turn has validation errors")]
    InvalidSibling { position: usize },
}

/// Illegal edits on a chunk.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EditRejection {
    #[error("tool results are produced by execution and cannot be edited")]
    ToolResultIsReadOnly,

    #[error("only tool_call chunks have a tool name")]
    NotAToolCall,
}

/// Correlates one execution request with its completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionTicket {
    pub chunk_id: ChunkId,
    pub tool_id: Uuid,
    pub tool_name: String,
    pub code: String,
    pub attempt: u64,
}

/// What happened when a completion was applied to its chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled {
    /// Execution succeeded; the result text must be paired with the chunk.
    Succeeded(String),
    /// Execution failed; the chunk went back to its prior state.
    Failed(ExecutionFailure),
    /// The ticket no longer matches the chunk's in-flight attempt.
    Stale,
}

impl Chunk {
    /// New empty text chunk.
    pub fn text() -> Self {
        Self::with_body(ChunkBody::Text {
            content: String::new(),
        })
    }

    /// New empty tool_call chunk with a fresh tool id.
    pub fn tool_call(tool_name: impl Into<String>) -> Self {
        Self::with_body(ChunkBody::ToolCall {
            content: String::new(),
            tool_name: tool_name.into(),
            tool_id: Uuid::new_v4(),
        })
    }

    /// Display-only tool_result produced by an execution.
    pub(crate) fn tool_result(content: String) -> Self {
        let mut chunk = Self::with_body(ChunkBody::ToolResult { content });
        chunk.state = ChunkState::Executed;
        chunk
    }

    fn with_body(body: ChunkBody) -> Self {
        let mut chunk = Self {
            id: Uuid::new_v4(),
            body,
            state: ChunkState::Empty,
            validation: ValidationResult::default(),
            failure: None,
        };
        chunk.revalidate();
        chunk
    }

    /// Replace the content. Never blocked by validation; annotations are
    /// refreshed and an `Empty` chunk starts `Editing`.
    pub fn edit(&mut self, content: impl Into<String>) -> Result<&ValidationResult, EditRejection> {
        if self.kind() == ChunkKind::ToolResult {
            return Err(EditRejection::ToolResultIsReadOnly);
        }
        *self.body.content_mut() = content.into();
        if self.state == ChunkState::Empty {
            self.state = ChunkState::Editing;
        }
        self.revalidate();
        Ok(&self.validation)
    }

    pub fn set_tool_name(&mut self, name: impl Into<String>) -> Result<&ValidationResult, EditRejection> {
        match &mut self.body {
            ChunkBody::ToolCall { tool_name, .. } => *tool_name = name.into(),
            _ => return Err(EditRejection::NotAToolCall),
        }
        self.revalidate();
        Ok(&self.validation)
    }

    /// Recompute validation annotations from the current content.
    pub fn revalidate(&mut self) {
        self.validation = match &self.body {
            ChunkBody::ToolCall {
                content, tool_name, ..
            } => {
                let mut result = analyze(content);
                if tool_name.trim().is_empty() {
                    result.push_error("Tool name is required");
                }
                result.settle()
            }
            body => validate_content(body.content(), body.kind()),
        };
    }

    /// Check the execute preconditions local to this chunk.
    pub fn execution_gate(&self) -> Result<(), ExecuteRejection> {
        let ChunkBody::ToolCall {
            content, tool_name, ..
        } = &self.body
        else {
            return Err(ExecuteRejection::NotAToolCall);
        };
        if self.state.is_executing() {
            return Err(ExecuteRejection::AlreadyExecuting);
        }
        if content.trim().is_empty() {
            return Err(ExecuteRejection::EmptyCode);
        }
        if tool_name.trim().is_empty() {
            return Err(ExecuteRejection::MissingToolName);
        }
        if !self.validation.is_valid {
            return Err(ExecuteRejection::InvalidCode {
                count: self.validation.syntax_errors.len() + self.validation.errors.len(),
            });
        }
        Ok(())
    }

    /// Enter `Executing` and hand out the ticket for the remote call.
    pub(crate) fn begin_execution(&mut self, attempt: u64) -> Result<ExecutionTicket, ExecuteRejection> {
        self.execution_gate()?;

        let ChunkBody::ToolCall {
            content,
            tool_name,
            tool_id,
        } = &self.body
        else {
            return Err(ExecuteRejection::NotAToolCall);
        };

        let resume = if self.state == ChunkState::Executed {
            ResumeState::Executed
        } else {
            ResumeState::Editing
        };
        let ticket = ExecutionTicket {
            chunk_id: self.id,
            tool_id: *tool_id,
            tool_name: tool_name.clone(),
            code: content.clone(),
            attempt,
        };
        self.state = ChunkState::Executing { attempt, resume };
        self.failure = None;
        tracing::debug!(chunk_id = %self.id, attempt, "Chunk entered Executing");
        Ok(ticket)
    }

    /// Apply the outcome of the execution identified by `attempt`.
    pub(crate) fn finish_execution(
        &mut self,
        attempt: u64,
        outcome: Result<String, ExecutionFailure>,
    ) -> Settled {
        let resume = match self.state {
            ChunkState::Executing {
                attempt: current,
                resume,
            } if current == attempt => resume,
            _ => return Settled::Stale,
        };

        match outcome {
            Ok(result) => {
                self.state = ChunkState::Executed;
                self.failure = None;
                Settled::Succeeded(result)
            }
            Err(failure) => {
                self.state = resume.into();
                self.failure = Some(failure.clone());
                Settled::Failed(failure)
            }
        }
    }

    /// Stop waiting for the in-flight execution. Returns false when nothing
    /// was in flight.
    pub(crate) fn cancel_execution(&mut self) -> bool {
        match self.state {
            ChunkState::Executing { resume, .. } => {
                self.state = resume.into();
                true
            }
            _ => false,
        }
    }

    /// Rebuild the state of a chunk loaded from storage. `paired` tells
    /// whether a tool_call is immediately followed by its tool_result.
    pub(crate) fn restore(&mut self, paired: bool) {
        self.state = match self.kind() {
            ChunkKind::ToolResult => ChunkState::Executed,
            ChunkKind::ToolCall if paired => ChunkState::Executed,
            _ if self.content().trim().is_empty() => ChunkState::Empty,
            _ => ChunkState::Editing,
        };
        self.failure = None;
        self.revalidate();
    }

    /// Overwrite a tool_result with a newer execution result.
    pub(crate) fn replace_result(&mut self, content: String) {
        if let ChunkBody::ToolResult { content: current } = &mut self.body {
            *current = content;
            self.revalidate();
        }
    }
}
