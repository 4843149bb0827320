//! Local saved-conversation store.
//!
//! The store file is a JSON object; the conversations live as one array under
//! [`SAVED_CONVERSATIONS_KEY`]. Other keys in the file are preserved. Every
//! mutation is a whole-collection read-modify-write held under the store's
//! mutex and committed with a temp-file rename. Separate processes sharing the
//! file are not coordinated: the last writer wins.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::schema::{ConversationDraft, SavedConversation};

pub const SAVED_CONVERSATIONS_KEY: &str = "saved_conversations";

pub struct ConversationStore {
    path: PathBuf,
    lock: Mutex<()>,
}

type Document = serde_json::Map<String, serde_json::Value>;

impl ConversationStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::open(config.resolved_path())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn list(&self) -> Result<Vec<SavedConversation>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let (_, conversations) = self.read()?;
        Ok(conversations)
    }

    pub fn get(&self, id: &str) -> Result<SavedConversation, StoreError> {
        self.list()?
            .into_iter()
            .find(|c| c.id == id)
            .ok_or_else(|| StoreError::UnknownId { id: id.to_string() })
    }

    /// Save a new conversation. The id is derived from the current time.
    pub fn create(&self, draft: ConversationDraft) -> Result<SavedConversation, StoreError> {
        self.mutate(|conversations| {
            let now = Utc::now();
            let mut stamp = now.timestamp_millis();
            while conversations.iter().any(|c| c.id == stamp.to_string()) {
                stamp += 1;
            }

            let saved = SavedConversation {
                id: stamp.to_string(),
                name: draft.metadata.name,
                description: draft.metadata.description,
                tags: draft.metadata.tags,
                messages: draft.messages,
                created_at: now,
                updated_at: now,
            };
            conversations.push(saved.clone());
            tracing::info!(id = %saved.id, name = %saved.name, "Conversation saved");
            Ok(saved)
        })
    }

    /// Overwrite an existing conversation's content, keeping id and creation time.
    pub fn update(&self, id: &str, draft: ConversationDraft) -> Result<SavedConversation, StoreError> {
        self.mutate(|conversations| {
            let entry = conversations
                .iter_mut()
                .find(|c| c.id == id)
                .ok_or_else(|| StoreError::UnknownId { id: id.to_string() })?;

            entry.name = draft.metadata.name;
            entry.description = draft.metadata.description;
            entry.tags = draft.metadata.tags;
            entry.messages = draft.messages;
            entry.updated_at = Utc::now();
            tracing::info!(id = %entry.id, "Conversation updated");
            Ok(entry.clone())
        })
    }

    pub fn remove(&self, id: &str) -> Result<SavedConversation, StoreError> {
        self.mutate(|conversations| {
            let position = conversations
                .iter()
                .position(|c| c.id == id)
                .ok_or_else(|| StoreError::UnknownId { id: id.to_string() })?;
            let removed = conversations.remove(position);
            tracing::info!(id = %removed.id, "Conversation removed");
            Ok(removed)
        })
    }

    /// Write one conversation as pretty JSON into `dir`; returns the file path.
    pub fn export(&self, id: &str, dir: &Path) -> Result<PathBuf, StoreError> {
        let conversation = self.get(id)?;
        let target = dir.join(export_file_name(&conversation.name));
        let json = serde_json::to_string_pretty(&conversation)
            .map_err(|source| StoreError::serialize(&target, source))?;
        fs::write(&target, json).map_err(|source| StoreError::io("exporting", &target, source))?;
        Ok(target)
    }

    /// Add a conversation from an exported file under a fresh id.
    pub fn import(&self, file: &Path) -> Result<SavedConversation, StoreError> {
        let raw = fs::read_to_string(file).map_err(|source| StoreError::io("importing", file, source))?;
        let exported: SavedConversation =
            serde_json::from_str(&raw).map_err(|source| StoreError::parse(file, source))?;
        self.create(ConversationDraft {
            metadata: exported.metadata(),
            messages: exported.messages,
        })
    }

    fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut Vec<SavedConversation>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let (mut document, mut conversations) = self.read()?;
        let out = apply(&mut conversations)?;
        self.write(&mut document, &conversations)?;
        Ok(out)
    }

    fn read(&self) -> Result<(Document, Vec<SavedConversation>), StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Default::default()),
            Err(source) => return Err(StoreError::io("reading store", &self.path, source)),
        };
        if raw.trim().is_empty() {
            return Ok(Default::default());
        }

        let mut document: Document =
            serde_json::from_str(&raw).map_err(|source| StoreError::parse(&self.path, source))?;
        let conversations = match document.remove(SAVED_CONVERSATIONS_KEY) {
            Some(value) => serde_json::from_value(value)
                .map_err(|source| StoreError::parse(&self.path, source))?,
            None => Vec::new(),
        };
        Ok((document, conversations))
    }

    fn write(&self, document: &mut Document, conversations: &[SavedConversation]) -> Result<(), StoreError> {
        let value = serde_json::to_value(conversations)
            .map_err(|source| StoreError::serialize(&self.path, source))?;
        document.insert(SAVED_CONVERSATIONS_KEY.to_string(), value);
        let json = serde_json::to_string_pretty(document)
            .map_err(|source| StoreError::serialize(&self.path, source))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|source| StoreError::io("creating store directory", parent, source))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|source| StoreError::io("writing store", &tmp, source))?;
        fs::rename(&tmp, &self.path)
            .map_err(|source| StoreError::io("replacing store", &self.path, source))?;
        Ok(())
    }
}

/// `"My Example  v2"` → `"My-Example-v2.json"`.
///
/// The result is always a single path component: path separators and other
/// punctuation become `-`, and leading dots are stripped.
pub fn export_file_name(name: &str) -> String {
    let stem = name
        .split(|c: char| !(c.is_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    let stem = stem.trim_matches(|c| c == '.' || c == '-');
    if stem.is_empty() {
        "conversation.json".to_string()
    } else {
        format!("{}.json", stem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, Metadata, Role, Turn};

    fn draft(name: &str) -> ConversationDraft {
        let mut chunk = Chunk::text();
        chunk.edit("What is 2+2?").unwrap();
        ConversationDraft {
            metadata: Metadata {
                name: name.to_string(),
                description: "Adds numbers".to_string(),
                tags: vec!["math".to_string()],
            },
            messages: vec![Turn {
                role: Role::User,
                chunks: vec![chunk],
            }],
        }
    }

    #[test]
    fn test_empty_store_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::open(dir.path().join("missing.json"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_create_get_update_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::open(dir.path().join("nested").join("saved.json"));

        let first = store.create(draft("First")).unwrap();
        let second = store.create(draft("Second")).unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(store.list().unwrap().len(), 2);

        let fetched = store.get(&first.id).unwrap();
        assert_eq!(fetched.messages[0].chunks[0].content(), "What is 2+2?");

        let updated = store.update(&first.id, draft("Renamed")).unwrap();
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.created_at, first.created_at);
        assert!(updated.updated_at >= first.updated_at);

        let removed = store.remove(&second.id).unwrap();
        assert_eq!(removed.name, "Second");
        assert_eq!(store.list().unwrap().len(), 1);
        assert!(matches!(
            store.get(&second.id),
            Err(StoreError::UnknownId { .. })
        ));
    }

    #[test]
    fn test_unknown_id_on_update_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::open(dir.path().join("saved.json"));
        assert!(matches!(
            store.update("nope", draft("x")),
            Err(StoreError::UnknownId { .. })
        ));
        assert!(matches!(store.remove("nope"), Err(StoreError::UnknownId { .. })));
    }

    #[test]
    fn test_other_keys_are_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.json");
        fs::write(&path, r#"{ "theme": "dark" }"#).unwrap();

        let store = ConversationStore::open(&path);
        store.create(draft("First")).unwrap();

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["theme"], "dark");
        assert_eq!(raw[SAVED_CONVERSATIONS_KEY].as_array().unwrap().len(), 1);
        assert!(raw[SAVED_CONVERSATIONS_KEY][0].get("createdAt").is_some());
    }

    #[test]
    fn test_corrupt_store_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.json");
        fs::write(&path, "not json").unwrap();
        let store = ConversationStore::open(&path);
        assert!(matches!(store.list(), Err(StoreError::Parse { .. })));
    }

    #[test]
    fn test_export_and_import() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::open(dir.path().join("saved.json"));
        let saved = store.create(draft("Simple  addition example")).unwrap();

        let exported = store.export(&saved.id, dir.path()).unwrap();
        assert_eq!(
            exported.file_name().unwrap().to_str().unwrap(),
            "Simple-addition-example.json"
        );
        let text = fs::read_to_string(&exported).unwrap();
        assert!(text.contains("\n  \"name\""));

        let imported = store.import(&exported).unwrap();
        assert_ne!(imported.id, saved.id);
        let original = &saved.messages[0].chunks[0];
        let restored = &imported.messages[0].chunks[0];
        assert_eq!(restored.id, original.id);
        assert_eq!(restored.body(), original.body());
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn test_export_file_name() {
        assert_eq!(export_file_name("My Example\tv2"), "My-Example-v2.json");
        assert_eq!(export_file_name("   "), "conversation.json");
        assert_eq!(export_file_name("Add 1/2 halves"), "Add-1-2-halves.json");
        assert_eq!(export_file_name("../escaped"), "escaped.json");
        assert_eq!(export_file_name("..\\up"), "up.json");
        assert_eq!(export_file_name(".."), "conversation.json");
    }

    #[test]
    fn test_export_stays_inside_target_dir() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();
        let store = ConversationStore::open(dir.path().join("saved.json"));

        for name in ["../escaped", "Add 1/2 halves"] {
            let saved = store.create(draft(name)).unwrap();
            let exported = store.export(&saved.id, &out).unwrap();
            assert_eq!(exported.parent(), Some(out.as_path()));
            assert!(exported.is_file());
        }
        assert!(!dir.path().join("escaped.json").exists());
    }
}
