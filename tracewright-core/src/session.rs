//! Editing session: the single owner of the trace under construction.
//!
//! The session owns the turns, the example metadata, the undo history, the
//! current selection and the pending-removal gate. Every mutation of the trace
//! goes through it. Validation failures are soft: they are attached to chunks
//! and reported by [`EditingSession::violations`], and only execution and
//! submission are refused while they persist.
//!
//! Execution is split in two so the caller can keep editing while a remote
//! call is in flight:
//! 1. [`EditingSession::begin_execute`] checks the gate, moves the chunk to
//!    `Executing` and returns an [`ExecutionTicket`].
//! 2. [`EditingSession::complete_execute`] applies the outcome. Tickets that
//!    no longer match (cancelled, re-issued, chunk removed) are dropped.
//!
//! [`EditingSession::execute`] and [`EditingSession::execute_pending`] wrap
//! both halves around an [`Executor`].

use futures::future::join_all;

use crate::backend::{BackendError, ExamplesApi, ExecutionOutput, Executor, NO_OUTPUT};
use crate::chunk::{ExecuteRejection, ExecutionTicket, Settled};
use crate::error::{SessionError, StoreError, TracewrightError};
use crate::models::{
    Chunk, ChunkBody, ChunkId, ChunkKind, ChunkState, ExecutionFailure, Metadata, Role, Turn,
};
use crate::schema::{
    to_api_format, ConversationDraft, ExampleUpdate, PersistedExample, SavedConversation,
};
use crate::store::ConversationStore;
use crate::trace::{validate_trace, Violation};
use crate::validation::ValidationResult;

/// A removal waiting for the user to confirm or cancel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRemoval {
    pub chunk_id: ChunkId,
    pub kind: ChunkKind,
}

/// Result of applying an execution outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The tool_call is `Executed`; `result_chunk` holds its output.
    Paired { result_chunk: ChunkId },
    /// The tool_call went back to its prior state with a failure attached.
    Failed(ExecutionFailure),
    /// The outcome belonged to a cancelled or superseded execution.
    Stale,
}

pub struct EditingSession {
    turns: Vec<Turn>,
    metadata: Metadata,
    history: Vec<Vec<Turn>>,
    selected: Option<ChunkId>,
    pending_removal: Option<PendingRemoval>,
    next_attempt: u64,
    default_tool_name: String,
    saved_id: Option<String>,
}

impl EditingSession {
    /// Fresh session: one user turn holding one empty text chunk.
    pub fn new(default_tool_name: impl Into<String>) -> Self {
        let mut session = Self {
            turns: Vec::new(),
            metadata: Metadata::default(),
            history: Vec::new(),
            selected: None,
            pending_removal: None,
            next_attempt: 1,
            default_tool_name: default_tool_name.into(),
            saved_id: None,
        };
        let mut first = Turn::new(Role::User);
        let chunk = Chunk::text();
        session.selected = Some(chunk.id);
        first.chunks.push(chunk);
        session.turns.push(first);
        session
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn set_metadata(&mut self, metadata: Metadata) {
        self.metadata = metadata;
    }

    pub fn chunk(&self, id: ChunkId) -> Option<&Chunk> {
        self.locate(id).map(|(t, c)| &self.turns[t].chunks[c])
    }

    /// (turn index, chunk index) of a chunk.
    pub fn locate(&self, id: ChunkId) -> Option<(usize, usize)> {
        self.turns
            .iter()
            .enumerate()
            .find_map(|(t, turn)| turn.position(id).map(|c| (t, c)))
    }

    pub fn selected(&self) -> Option<&Chunk> {
        self.selected.and_then(|id| self.chunk(id))
    }

    pub fn select(&mut self, id: ChunkId) -> Result<(), SessionError> {
        self.require(id)?;
        self.selected = Some(id);
        Ok(())
    }

    pub fn can_go_back(&self) -> bool {
        !self.history.is_empty()
    }

    pub fn pending_removal(&self) -> Option<&PendingRemoval> {
        self.pending_removal.as_ref()
    }

    /// Id of the saved conversation this session was loaded from or last saved as.
    pub fn saved_id(&self) -> Option<&str> {
        self.saved_id.as_deref()
    }

    fn require(&self, id: ChunkId) -> Result<(usize, usize), SessionError> {
        self.locate(id).ok_or(SessionError::UnknownChunk { id })
    }

    fn turn_mut(&mut self, index: usize) -> Result<&mut Turn, SessionError> {
        self.turns
            .get_mut(index)
            .ok_or(SessionError::UnknownTurn { index })
    }

    // ------------------------------------------------------------------
    // Turns and history
    // ------------------------------------------------------------------

    /// Append a turn and return its index. A user turn starts with one empty
    /// text chunk; an assistant turn starts empty and must be populated.
    pub fn add_turn(&mut self, role: Role) -> usize {
        self.history.push(self.turns.clone());

        let mut turn = Turn::new(role);
        if role == Role::User {
            let chunk = Chunk::text();
            self.selected = Some(chunk.id);
            turn.chunks.push(chunk);
        }
        self.turns.push(turn);
        tracing::debug!(role = %role, turns = self.turns.len(), "Turn added");
        self.turns.len() - 1
    }

    /// Restore the turns as they were before the last `add_turn`. Returns
    /// false when there is nothing to go back to.
    pub fn go_back(&mut self) -> bool {
        let Some(previous) = self.history.pop() else {
            return false;
        };
        self.turns = previous;
        if self.selected.is_some_and(|id| self.locate(id).is_none()) {
            self.selected = None;
        }
        if let Some(pending) = &self.pending_removal {
            if self.locate(pending.chunk_id).is_none() {
                self.pending_removal = None;
            }
        }
        tracing::debug!(turns = self.turns.len(), "Went back one step");
        true
    }

    // ------------------------------------------------------------------
    // Chunk editing
    // ------------------------------------------------------------------

    pub fn add_text_chunk(&mut self, turn: usize) -> Result<ChunkId, SessionError> {
        let chunk = Chunk::text();
        let id = chunk.id;
        self.turn_mut(turn)?.chunks.push(chunk);
        self.selected = Some(id);
        Ok(id)
    }

    /// Append a tool_call to an assistant turn. `None` uses the configured
    /// default tool name.
    pub fn add_tool_call_chunk(
        &mut self,
        turn: usize,
        tool_name: Option<&str>,
    ) -> Result<ChunkId, SessionError> {
        let name = tool_name.unwrap_or(self.default_tool_name.as_str()).to_string();
        let target = self.turn_mut(turn)?;
        if target.role == Role::User {
            return Err(SessionError::ToolCallInUserTurn { index: turn });
        }
        let chunk = Chunk::tool_call(name);
        let id = chunk.id;
        target.chunks.push(chunk);
        self.selected = Some(id);
        Ok(id)
    }

    pub fn edit_chunk(
        &mut self,
        id: ChunkId,
        content: impl Into<String>,
    ) -> Result<&ValidationResult, SessionError> {
        let (t, c) = self.require(id)?;
        Ok(self.turns[t].chunks[c].edit(content)?)
    }

    pub fn set_tool_name(
        &mut self,
        id: ChunkId,
        name: impl Into<String>,
    ) -> Result<&ValidationResult, SessionError> {
        let (t, c) = self.require(id)?;
        Ok(self.turns[t].chunks[c].set_tool_name(name)?)
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Check every execute precondition without changing anything.
    pub fn can_execute(&self, id: ChunkId) -> Result<(), SessionError> {
        let (t, c) = self.require(id)?;
        let turn = &self.turns[t];
        turn.chunks[c].execution_gate()?;

        if let Some(position) = turn
            .chunks
            .iter()
            .enumerate()
            .position(|(i, sibling)| i != c && !sibling.validation().is_valid)
        {
            return Err(ExecuteRejection::InvalidSibling {
                position: position + 1,
            }
            .into());
        }
        Ok(())
    }

    /// Move a tool_call to `Executing` and return the ticket for the remote
    /// call. A chunk already executing is refused without any change.
    pub fn begin_execute(&mut self, id: ChunkId) -> Result<ExecutionTicket, SessionError> {
        if let Err(e) = self.can_execute(id) {
            tracing::debug!(chunk_id = %id, reason = %e, "Execute refused");
            return Err(e);
        }
        let (t, c) = self.require(id)?;
        let attempt = self.next_attempt;
        self.next_attempt += 1;
        Ok(self.turns[t].chunks[c].begin_execution(attempt)?)
    }

    /// Apply the outcome of a ticket's remote call.
    pub fn complete_execute(
        &mut self,
        ticket: &ExecutionTicket,
        outcome: Result<String, ExecutionFailure>,
    ) -> Completion {
        let Some((t, c)) = self.locate(ticket.chunk_id) else {
            tracing::warn!(chunk_id = %ticket.chunk_id, "Execution finished for a removed chunk");
            return Completion::Stale;
        };

        let chunks = &mut self.turns[t].chunks;
        match chunks[c].finish_execution(ticket.attempt, outcome) {
            Settled::Stale => {
                tracing::warn!(
                    chunk_id = %ticket.chunk_id,
                    attempt = ticket.attempt,
                    "Ignoring stale execution result"
                );
                Completion::Stale
            }
            Settled::Failed(failure) => {
                tracing::warn!(
                    chunk_id = %ticket.chunk_id,
                    retryable = failure.retryable,
                    error = %failure.message,
                    "Execution failed"
                );
                Completion::Failed(failure)
            }
            Settled::Succeeded(text) => {
                let text = if text.trim().is_empty() {
                    NO_OUTPUT.to_string()
                } else {
                    text
                };
                let has_result = chunks
                    .get(c + 1)
                    .is_some_and(|next| next.kind() == ChunkKind::ToolResult);
                let result_chunk = if has_result {
                    let next = &mut chunks[c + 1];
                    next.replace_result(text);
                    next.id
                } else {
                    let result = Chunk::tool_result(text);
                    let id = result.id;
                    chunks.insert(c + 1, result);
                    id
                };
                tracing::info!(
                    chunk_id = %ticket.chunk_id,
                    tool = %ticket.tool_name,
                    result_chunk = %result_chunk,
                    "Execution succeeded"
                );
                Completion::Paired { result_chunk }
            }
        }
    }

    /// Stop waiting for a chunk's in-flight execution. The remote call may
    /// still finish; its result will be ignored.
    pub fn cancel_execute(&mut self, id: ChunkId) -> Result<bool, SessionError> {
        let (t, c) = self.require(id)?;
        let cancelled = self.turns[t].chunks[c].cancel_execution();
        if cancelled {
            tracing::info!(chunk_id = %id, "Execution cancelled");
        }
        Ok(cancelled)
    }

    /// Execute one tool_call end to end.
    pub async fn execute(
        &mut self,
        id: ChunkId,
        executor: &dyn Executor,
    ) -> Result<Completion, SessionError> {
        let ticket = self.begin_execute(id)?;
        let output = executor.execute(&ticket.code).await;
        Ok(self.complete_execute(&ticket, outcome_of(output)))
    }

    /// Execute every tool_call of a turn that has not run yet, concurrently.
    /// Calls that fail the gate are skipped.
    pub async fn execute_pending(
        &mut self,
        turn: usize,
        executor: &dyn Executor,
    ) -> Result<Vec<(ChunkId, Completion)>, SessionError> {
        let candidates: Vec<ChunkId> = self
            .turns
            .get(turn)
            .ok_or(SessionError::UnknownTurn { index: turn })?
            .chunks
            .iter()
            .filter(|c| c.kind() == ChunkKind::ToolCall)
            .filter(|c| matches!(c.state(), ChunkState::Editing | ChunkState::Empty))
            .map(|c| c.id)
            .collect();

        let mut tickets = Vec::new();
        for id in candidates {
            match self.begin_execute(id) {
                Ok(ticket) => tickets.push(ticket),
                Err(e) => tracing::debug!(chunk_id = %id, reason = %e, "Skipping tool call"),
            }
        }

        let outputs = join_all(tickets.iter().map(|t| executor.execute(&t.code))).await;

        Ok(tickets
            .iter()
            .zip(outputs)
            .map(|(ticket, output)| {
                let completion = self.complete_execute(ticket, outcome_of(output));
                (ticket.chunk_id, completion)
            })
            .collect())
    }

    pub fn is_executing(&self) -> bool {
        self.turns
            .iter()
            .flat_map(|turn| turn.chunks.iter())
            .any(|chunk| chunk.state().is_executing())
    }

    // ------------------------------------------------------------------
    // Removal
    // ------------------------------------------------------------------

    /// First step of removal: record what would be removed.
    pub fn request_remove(&mut self, id: ChunkId) -> Result<&PendingRemoval, SessionError> {
        let (t, c) = self.require(id)?;
        let kind = self.turns[t].chunks[c].kind();
        Ok(&*self.pending_removal.insert(PendingRemoval { chunk_id: id, kind }))
    }

    /// Second step of removal. Paired chunks are left alone.
    pub fn confirm_remove(&mut self) -> Result<Chunk, SessionError> {
        let pending = self
            .pending_removal
            .take()
            .ok_or(SessionError::NoPendingRemoval)?;
        let (t, c) = self.require(pending.chunk_id)?;
        let removed = self.turns[t].chunks.remove(c);
        if self.selected == Some(removed.id) {
            self.selected = None;
        }
        tracing::info!(chunk_id = %removed.id, turn = t, "Chunk removed");
        Ok(removed)
    }

    pub fn cancel_remove(&mut self) -> bool {
        self.pending_removal.take().is_some()
    }

    // ------------------------------------------------------------------
    // Validation and submission
    // ------------------------------------------------------------------

    pub fn violations(&self) -> Vec<Violation> {
        validate_trace(&self.turns, &self.metadata)
    }

    pub fn can_submit(&self) -> bool {
        !self.is_executing() && self.violations().is_empty()
    }

    pub fn to_api_format(&self) -> PersistedExample {
        to_api_format(&self.turns, &self.metadata)
    }

    /// The persisted example, or the reasons it cannot be submitted yet.
    pub fn submission(&self) -> Result<PersistedExample, SessionError> {
        self.ensure_submittable()?;
        Ok(self.to_api_format())
    }

    fn ensure_submittable(&self) -> Result<(), SessionError> {
        let mut violations: Vec<String> =
            self.violations().into_iter().map(|v| v.message).collect();
        if self.is_executing() {
            violations.push("An execution is still in progress".to_string());
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(SessionError::NotSubmittable { violations })
        }
    }

    /// Create the example remotely, or replace the content of `existing`.
    pub async fn submit(
        &self,
        api: &dyn ExamplesApi,
        existing: Option<&str>,
    ) -> Result<PersistedExample, TracewrightError> {
        let example = self.submission()?;
        let stored = match existing {
            Some(id) => {
                api.update_example(id, &ExampleUpdate::from_example(&example))
                    .await?
            }
            None => api.create_example(&example).await?,
        };
        tracing::info!(example_id = %stored.id, steps = stored.steps.len(), "Example submitted");
        Ok(stored)
    }

    /// Save to the local store: a new entry the first time, an update of the
    /// same entry afterwards. Refused while the trace has violations.
    pub fn save(&mut self, store: &ConversationStore) -> Result<SavedConversation, TracewrightError> {
        self.ensure_submittable()?;
        let saved = match self.saved_id.as_deref() {
            Some(id) => match store.update(id, self.draft()) {
                Err(StoreError::UnknownId { .. }) => {
                    tracing::warn!(id = %id, "Saved entry is gone, saving as new");
                    store.create(self.draft())?
                }
                other => other?,
            },
            None => store.create(self.draft())?,
        };
        self.saved_id = Some(saved.id.clone());
        Ok(saved)
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub fn draft(&self) -> ConversationDraft {
        ConversationDraft {
            metadata: self.metadata.clone(),
            messages: self.turns.clone(),
        }
    }

    /// Replace the whole session with a saved conversation. In-progress
    /// edits and history are discarded.
    pub fn load_conversation(&mut self, saved: SavedConversation) {
        tracing::info!(
            id = %saved.id,
            turns = saved.messages.len(),
            "Loading saved conversation"
        );
        self.metadata = saved.metadata();
        self.turns = saved.messages;
        restore_turns(&mut self.turns);
        self.reset_editing_state();
        self.saved_id = Some(saved.id);
    }

    /// Replace the whole session with an approximation of a persisted
    /// example: the prompt becomes the user turn and every step becomes a
    /// thought, a tool_call and its result in one assistant turn.
    pub fn load_example(&mut self, example: PersistedExample) {
        tracing::info!(id = %example.id, steps = example.steps.len(), "Loading example");

        let mut prompt = Chunk::text();
        *prompt.body.content_mut() = example.user_prompt;
        let mut user = Turn::new(Role::User);
        user.chunks.push(prompt);

        let mut assistant = Turn::new(Role::Assistant);
        for step in example.steps {
            let code = step
                .params
                .get("code")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| step.params.to_string());

            let mut thought = Chunk::text();
            *thought.body.content_mut() = step.thought;
            let mut call = Chunk::tool_call(step.tool_name);
            *call.body.content_mut() = code;
            assistant.chunks.push(thought);
            assistant.chunks.push(call);
            assistant.chunks.push(Chunk::tool_result(step.result));
        }

        self.metadata = Metadata {
            name: example.name,
            description: example.description,
            tags: example.tags,
        };
        self.turns = vec![user, assistant];
        restore_turns(&mut self.turns);
        self.reset_editing_state();
        self.saved_id = None;
    }

    fn reset_editing_state(&mut self) {
        self.history.clear();
        self.pending_removal = None;
        self.selected = None;
    }
}

/// Recompute state and annotations of freshly loaded turns.
fn restore_turns(turns: &mut [Turn]) {
    for turn in turns {
        for c in 0..turn.chunks.len() {
            let paired = matches!(turn.chunks[c].body, ChunkBody::ToolCall { .. })
                && turn
                    .chunks
                    .get(c + 1)
                    .is_some_and(|next| next.kind() == ChunkKind::ToolResult);
            turn.chunks[c].restore(paired);
        }
    }
}

fn outcome_of(output: Result<ExecutionOutput, BackendError>) -> Result<String, ExecutionFailure> {
    match output {
        Ok(output) => output.into_result_text(),
        Err(e) => Err(e.to_failure()),
    }
}
