//! Persisted forms of a trace.
//!
//! - [`PersistedExample`]: the examples service schema. Produced from a
//!   trace by [`to_api_format`], a one-way projection: thoughts are
//!   synthesized and step results are placeholders, so the trace cannot be
//!   rebuilt from it.
//! - [`SavedConversation`]: the local snapshot, which keeps every turn and
//!   chunk and round-trips losslessly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChunkBody, Metadata, Role, Turn};

/// Result text written into every projected step.
pub const PLACEHOLDER_RESULT: &str = "Result will be populated when the example is executed";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub thought: String,
    pub tool_name: String,
    pub params: serde_json::Value,
    pub result: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedExample {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub user_prompt: String,
    #[serde(default)]
    pub steps: Vec<Step>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// Partial update for `PATCH /examples/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExampleUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<Step>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

impl ExampleUpdate {
    /// Full replacement of the mutable fields from a freshly projected example.
    pub fn from_example(example: &PersistedExample) -> Self {
        Self {
            name: Some(example.name.clone()),
            description: Some(example.description.clone()),
            tags: Some(example.tags.clone()),
            user_prompt: Some(example.user_prompt.clone()),
            steps: Some(example.steps.clone()),
            updated: Some(example.updated),
        }
    }
}

/// Local saved-conversation entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedConversation {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub messages: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SavedConversation {
    pub fn metadata(&self) -> Metadata {
        Metadata {
            name: self.name.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
        }
    }
}

/// Content of a conversation about to be saved; the store assigns id and
/// timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationDraft {
    pub metadata: Metadata,
    pub messages: Vec<Turn>,
}

fn synthesize_thought(index: usize, tool_name: &str) -> String {
    if index == 0 {
        format!("I need to use the {} tool to answer this request.", tool_name)
    } else {
        format!("Next, I will use the {} tool to continue.", tool_name)
    }
}

/// Project a trace into the examples service schema.
pub fn to_api_format(turns: &[Turn], metadata: &Metadata) -> PersistedExample {
    let user_prompt = turns
        .iter()
        .find(|turn| turn.role == Role::User)
        .map(|turn| {
            turn.chunks
                .iter()
                .filter_map(|chunk| match &chunk.body {
                    ChunkBody::Text { content } => Some(content.trim()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();

    let steps = turns
        .iter()
        .filter(|turn| turn.role == Role::Assistant)
        .flat_map(|turn| turn.chunks.iter())
        .filter_map(|chunk| match &chunk.body {
            ChunkBody::ToolCall {
                content, tool_name, ..
            } => Some((tool_name, content)),
            _ => None,
        })
        .enumerate()
        .map(|(index, (tool_name, code))| Step {
            thought: synthesize_thought(index, tool_name),
            tool_name: tool_name.clone(),
            params: serde_json::json!({ "code": code }),
            result: PLACEHOLDER_RESULT.to_string(),
        })
        .collect();

    let now = Utc::now();
    PersistedExample {
        id: Uuid::new_v4().to_string(),
        name: metadata.name.trim().to_string(),
        description: metadata.description.trim().to_string(),
        tags: metadata.tags.clone(),
        user_prompt,
        steps,
        created: now,
        updated: now,
    }
}
