//! End-to-end curation scenarios driven through the editing session with a
//! scripted executor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracewright_core::backend::{
    BackendError, ChunkExecution, CodeChunk, ExamplesApi, ExecutionOutput, Executor, NO_OUTPUT,
};
use tracewright_core::{
    ChunkKind, ChunkState, Completion, EditingSession, ExampleUpdate, Metadata, PersistedExample,
    Role, SessionError, TracewrightError, ViolationKind,
};

/// Answers every execution with a fixed result and records the code it saw.
struct ScriptedExecutor {
    result: serde_json::Value,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    fn returning(result: serde_json::Value) -> Self {
        Self {
            result,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn execute(&self, code: &str) -> Result<ExecutionOutput, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(code.to_string());
        Ok(ExecutionOutput {
            status: "success".to_string(),
            result: self.result.clone(),
            error: None,
        })
    }

    async fn execute_batch(&self, chunks: &[CodeChunk]) -> Result<Vec<ChunkExecution>, BackendError> {
        let mut out = Vec::new();
        for chunk in chunks {
            out.push(ChunkExecution {
                chunk_id: chunk.chunk_id.clone(),
                output: self.execute(&chunk.code).await?,
            });
        }
        Ok(out)
    }
}

/// Always fails as if the service timed out.
struct TimingOutExecutor;

#[async_trait]
impl Executor for TimingOutExecutor {
    async fn execute(&self, _code: &str) -> Result<ExecutionOutput, BackendError> {
        Err(BackendError::Timeout { seconds: 30 })
    }

    async fn execute_batch(&self, _chunks: &[CodeChunk]) -> Result<Vec<ChunkExecution>, BackendError> {
        Err(BackendError::Timeout { seconds: 30 })
    }
}

/// Keeps created examples in memory and records updates.
#[derive(Default)]
struct RecordingExamples {
    created: Mutex<Vec<PersistedExample>>,
    updates: Mutex<Vec<(String, ExampleUpdate)>>,
}

#[async_trait]
impl ExamplesApi for RecordingExamples {
    async fn list_examples(&self) -> Result<Vec<PersistedExample>, BackendError> {
        Ok(self.created.lock().unwrap().clone())
    }

    async fn get_example(&self, id: &str) -> Result<PersistedExample, BackendError> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound {
                resource: "example",
                id: id.to_string(),
            })
    }

    async fn create_example(&self, example: &PersistedExample) -> Result<PersistedExample, BackendError> {
        self.created.lock().unwrap().push(example.clone());
        Ok(example.clone())
    }

    async fn update_example(&self, id: &str, update: &ExampleUpdate) -> Result<PersistedExample, BackendError> {
        self.updates
            .lock()
            .unwrap()
            .push((id.to_string(), update.clone()));
        let mut example = self.get_example(id).await?;
        if let Some(name) = &update.name {
            example.name = name.clone();
        }
        if let Some(steps) = &update.steps {
            example.steps = steps.clone();
        }
        Ok(example)
    }

    async fn import_markdown(&self, path: &str) -> Result<PersistedExample, BackendError> {
        Err(BackendError::Api {
            code: 400,
            message: format!("cannot import {}", path),
        })
    }
}

fn metadata() -> Metadata {
    Metadata {
        name: "Simple addition".to_string(),
        description: "Answers an arithmetic question with a tool call".to_string(),
        tags: vec!["math".to_string()],
    }
}

#[test]
fn scenario_a_submit_requires_assistant_turn() {
    let mut session = EditingSession::new("python");
    session.set_metadata(metadata());
    let prompt = session.turns()[0].chunks[0].id;

    assert!(!session.can_submit());
    assert!(session
        .violations()
        .iter()
        .any(|v| v.kind == ViolationKind::EmptyChunk));

    session.edit_chunk(prompt, "What is 2+2?").unwrap();
    assert!(!session.can_submit());
    let kinds: Vec<_> = session.violations().iter().map(|v| v.kind).collect();
    assert_eq!(kinds, vec![ViolationKind::LastTurnNotAssistant]);

    let turn = session.add_turn(Role::Assistant);
    assert!(!session.can_submit(), "empty assistant turn must not submit");

    let answer = session.add_text_chunk(turn).unwrap();
    session.edit_chunk(answer, "2+2 equals 4.").unwrap();
    assert!(session.can_submit(), "{:?}", session.violations());

    let example = session.submission().unwrap();
    assert_eq!(example.user_prompt, "What is 2+2?");
    assert!(example.steps.is_empty());
}

#[tokio::test]
async fn scenario_b_fixing_code_enables_execution() {
    let mut session = EditingSession::new("python");
    session.set_metadata(metadata());
    let prompt = session.turns()[0].chunks[0].id;
    session.edit_chunk(prompt, "What is 2+2?").unwrap();

    let turn = session.add_turn(Role::Assistant);
    let call = session.add_tool_call_chunk(turn, None).unwrap();
    let annotations = session.edit_chunk(call, "print(1").unwrap();
    assert_eq!(annotations.syntax_errors.len(), 1);
    assert!(session.can_execute(call).is_err());

    let executor = ScriptedExecutor::returning(serde_json::json!("1"));
    assert!(session.execute(call, &executor).await.is_err());
    assert_eq!(executor.calls(), 0);

    session.edit_chunk(call, "print(1)").unwrap();
    assert!(session.can_execute(call).is_ok());

    let completion = session.execute(call, &executor).await.unwrap();
    assert!(matches!(completion, Completion::Paired { .. }));
    assert_eq!(executor.calls(), 1);
    assert_eq!(*executor.seen.lock().unwrap(), vec!["print(1)".to_string()]);

    let chunks = &session.turns()[turn].chunks;
    assert_eq!(chunks[0].state(), ChunkState::Executed);
    assert_eq!(chunks[1].kind(), ChunkKind::ToolResult);
    assert_eq!(chunks[1].content(), "1");
    assert!(session
        .violations()
        .iter()
        .all(|v| v.kind != ViolationKind::MissingToolResult));
    assert!(session.can_submit(), "{:?}", session.violations());

    let example = session.to_api_format();
    assert_eq!(example.steps.len(), 1);
    assert_eq!(example.steps[0].params["code"], "print(1)");
}

#[test]
fn scenario_c_removing_call_leaves_orphan_result() {
    let mut session = EditingSession::new("python");
    session.set_metadata(metadata());
    let prompt = session.turns()[0].chunks[0].id;
    session.edit_chunk(prompt, "What is 2+2?").unwrap();

    let turn = session.add_turn(Role::Assistant);
    let call = session.add_tool_call_chunk(turn, None).unwrap();
    session.edit_chunk(call, "print(2+2)").unwrap();
    let ticket = session.begin_execute(call).unwrap();
    session.complete_execute(&ticket, Ok("4".to_string()));
    assert!(session.can_submit());

    session.request_remove(call).unwrap();
    session.confirm_remove().unwrap();

    let chunks = &session.turns()[turn].chunks;
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].kind(), ChunkKind::ToolResult);

    let violations = session.violations();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].kind, ViolationKind::OrphanToolResult);
    assert_eq!(violations[0].turn, Some(turn));
    assert!(!session.can_submit());
}

#[tokio::test]
async fn second_execute_while_in_flight_makes_no_remote_call() {
    let mut session = EditingSession::new("python");
    let turn = session.add_turn(Role::Assistant);
    let call = session.add_tool_call_chunk(turn, None).unwrap();
    session.edit_chunk(call, "print(1)").unwrap();

    let ticket = session.begin_execute(call).unwrap();
    let executor = ScriptedExecutor::returning(serde_json::json!("1"));
    assert!(session.execute(call, &executor).await.is_err());
    assert_eq!(executor.calls(), 0);

    session.complete_execute(&ticket, Ok("1".to_string()));
    assert_eq!(session.turns()[turn].chunks.len(), 2);
}

#[tokio::test]
async fn timeout_is_retryable_and_preserves_state() {
    let mut session = EditingSession::new("python");
    let turn = session.add_turn(Role::Assistant);
    let call = session.add_tool_call_chunk(turn, None).unwrap();
    session.edit_chunk(call, "print(1)").unwrap();

    let completion = session.execute(call, &TimingOutExecutor).await.unwrap();
    match completion {
        Completion::Failed(failure) => {
            assert!(failure.retryable);
            assert!(failure.message.contains("timed out"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(session.turns()[turn].chunks.len(), 1);
    assert_eq!(session.chunk(call).unwrap().state(), ChunkState::Editing);

    let executor = ScriptedExecutor::returning(serde_json::json!({ "value": 1 }));
    let retried = session.execute(call, &executor).await.unwrap();
    assert!(matches!(retried, Completion::Paired { .. }));
    assert_eq!(session.turns()[turn].chunks[1].content(), "{\n  \"value\": 1\n}");
}

#[tokio::test]
async fn execution_without_output_still_pairs_and_can_rerun() {
    let mut session = EditingSession::new("python");
    session.set_metadata(metadata());
    let prompt = session.turns()[0].chunks[0].id;
    session.edit_chunk(prompt, "Store one in x").unwrap();
    let turn = session.add_turn(Role::Assistant);
    let call = session.add_tool_call_chunk(turn, None).unwrap();
    session.edit_chunk(call, "x = 1").unwrap();

    let executor = ScriptedExecutor::returning(serde_json::Value::Null);
    let completion = session.execute(call, &executor).await.unwrap();
    assert!(matches!(completion, Completion::Paired { .. }));

    let chunks = &session.turns()[turn].chunks;
    assert_eq!(chunks[1].kind(), ChunkKind::ToolResult);
    assert_eq!(chunks[1].content(), NO_OUTPUT);
    assert!(session
        .violations()
        .iter()
        .all(|v| v.kind != ViolationKind::EmptyChunk));
    assert!(session.can_submit(), "{:?}", session.violations());
    assert!(session.can_execute(call).is_ok());

    let ticket = session.begin_execute(call).unwrap();
    session.complete_execute(&ticket, Ok(String::new()));
    let chunks = &session.turns()[turn].chunks;
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[1].content(), NO_OUTPUT);
}

#[tokio::test]
async fn execute_pending_runs_every_ready_call() {
    let mut session = EditingSession::new("python");
    let turn = session.add_turn(Role::Assistant);
    let first = session.add_tool_call_chunk(turn, None).unwrap();
    session.edit_chunk(first, "print(1)").unwrap();
    let second = session.add_tool_call_chunk(turn, Some("calculator")).unwrap();
    session.edit_chunk(second, "add(1, 2)").unwrap();

    let executor = ScriptedExecutor::returning(serde_json::json!("ok"));
    let completions = session.execute_pending(turn, &executor).await.unwrap();

    assert_eq!(completions.len(), 2);
    assert_eq!(executor.calls(), 2);
    let kinds: Vec<_> = session.turns()[turn].chunks.iter().map(|c| c.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            ChunkKind::ToolCall,
            ChunkKind::ToolResult,
            ChunkKind::ToolCall,
            ChunkKind::ToolResult
        ]
    );

    let again = session.execute_pending(turn, &executor).await.unwrap();
    assert!(again.is_empty());
    assert_eq!(executor.calls(), 2);
}

#[tokio::test]
async fn submit_creates_then_updates_remote_example() {
    let api = RecordingExamples::default();

    let session = EditingSession::new("python");
    match session.submit(&api, None).await {
        Err(TracewrightError::Session(SessionError::NotSubmittable { violations })) => {
            assert!(!violations.is_empty())
        }
        other => panic!("expected NotSubmittable, got {:?}", other),
    }
    assert!(api.created.lock().unwrap().is_empty());

    let mut session = EditingSession::new("python");
    session.set_metadata(metadata());
    let prompt = session.turns()[0].chunks[0].id;
    session.edit_chunk(prompt, "What is 2+2?").unwrap();
    let turn = session.add_turn(Role::Assistant);
    let call = session.add_tool_call_chunk(turn, None).unwrap();
    session.edit_chunk(call, "print(2+2)").unwrap();
    let executor = ScriptedExecutor::returning(serde_json::json!("4"));
    session.execute(call, &executor).await.unwrap();

    let created = session.submit(&api, None).await.unwrap();
    assert_eq!(created.steps.len(), 1);
    assert_eq!(created.user_prompt, "What is 2+2?");

    session.edit_chunk(call, "print(2 + 2)").unwrap();
    let updated = session.submit(&api, Some(created.id.as_str())).await.unwrap();
    assert_eq!(updated.id, created.id);
    assert_eq!(updated.steps[0].params["code"], "print(2 + 2)");

    let updates = api.updates.lock().unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, created.id);
    assert_eq!(updates[0].1.name.as_deref(), Some("Simple addition"));
}
