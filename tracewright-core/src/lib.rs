pub mod analyzer;
pub mod backend;
pub mod chunk;
pub mod config;
pub mod error;
pub mod models;
pub mod schema;
pub mod session;
pub mod store;
pub mod trace;
pub mod validation;

pub use analyzer::analyze;
pub use backend::{
    BackendError, ChunkExecution, CodeChunk, ExamplesApi, ExecutionOutput, Executor, HttpBackend,
    ToolInfo, ToolsCatalog,
};
pub use chunk::{EditRejection, ExecuteRejection, ExecutionTicket};
pub use config::TracewrightConfig;
pub use error::{SessionError, StoreError, TracewrightError};
pub use models::{Chunk, ChunkBody, ChunkId, ChunkKind, ChunkState, ExecutionFailure, Metadata, Role, Turn};
pub use schema::{ConversationDraft, ExampleUpdate, PersistedExample, SavedConversation, Step};
pub use session::{Completion, EditingSession, PendingRemoval};
pub use store::ConversationStore;
pub use trace::{validate_trace, validate_turns, Violation, ViolationKind};
pub use validation::{validate_content, validate_metadata, SyntaxError, ValidationResult};
