//! Content validation: structural checks for a single chunk and for the
//! example metadata.
//!
//! Validation never fails with an error value: every check produces a
//! [`ValidationResult`] that is attached to the chunk or field it describes.
//! Only the downstream actions (execute, save) look at `is_valid`.

use serde::{Deserialize, Serialize};

use crate::models::ChunkKind;

/// Maximum length of a text chunk, in characters.
pub const TEXT_MAX_CHARS: usize = 2000;

/// Text chunks shorter than this get a "very short" warning.
pub const TEXT_SHORT_CHARS: usize = 5;

pub const NAME_MIN_CHARS: usize = 3;
pub const NAME_MAX_CHARS: usize = 100;
pub const DESCRIPTION_MAX_CHARS: usize = 500;

/// A bracket or parse problem located on a 1-based line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxError {
    pub line: usize,
    pub message: String,
}

/// Outcome of validating one piece of content.
///
/// `syntax_errors` is only populated for code (tool_call) content.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub syntax_errors: Vec<SyntaxError>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            ..Self::default()
        }
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        self.is_valid = false;
    }

    pub fn push_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Recompute `is_valid` from the accumulated errors.
    pub(crate) fn settle(mut self) -> Self {
        self.is_valid = self.errors.is_empty() && self.syntax_errors.is_empty();
        self
    }
}

/// Check a chunk's content against its kind.
pub fn validate_content(content: &str, kind: ChunkKind) -> ValidationResult {
    let mut result = ValidationResult::valid();
    let trimmed = content.trim();

    if trimmed.is_empty() {
        result.push_error(match kind {
            ChunkKind::Text => "Text content cannot be empty",
            ChunkKind::ToolCall => "Code cannot be empty",
            ChunkKind::ToolResult => "Tool result cannot be empty",
        });
        return result;
    }

    if kind == ChunkKind::Text {
        let len = content.chars().count();
        if len > TEXT_MAX_CHARS {
            result.push_error(format!(
                "Text is too long ({} characters, maximum {})",
                len, TEXT_MAX_CHARS
            ));
        } else if len < TEXT_SHORT_CHARS {
            result.push_warning("Text is very short and may lack context");
        }
    }

    result.settle()
}

/// Check the example name and description.
pub fn validate_metadata(name: &str, description: &str) -> ValidationResult {
    let mut result = ValidationResult::valid();

    let name = name.trim();
    let name_len = name.chars().count();
    if name.is_empty() {
        result.push_error("Name is required");
    } else if name_len < NAME_MIN_CHARS {
        result.push_error(format!("Name must be at least {} characters", NAME_MIN_CHARS));
    } else if name_len > NAME_MAX_CHARS {
        result.push_error(format!("Name cannot exceed {} characters", NAME_MAX_CHARS));
    }

    let description = description.trim();
    if description.chars().count() > DESCRIPTION_MAX_CHARS {
        result.push_error(format!(
            "Description cannot exceed {} characters",
            DESCRIPTION_MAX_CHARS
        ));
    } else if description.is_empty() {
        result.push_warning("A description is recommended to explain what this example teaches");
    }

    result.settle()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_warns_without_error() {
        let result = validate_content("hi", ChunkKind::Text);
        assert!(result.is_valid);
        assert!(result.errors.is_empty());
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("very short"));
    }

    #[test]
    fn test_text_over_limit_is_error() {
        let result = validate_content(&"a".repeat(2001), ChunkKind::Text);
        assert!(!result.is_valid);
        assert!(result.errors[0].contains("too long"));
    }

    #[test]
    fn test_text_limit_counts_surrounding_whitespace() {
        let padded = format!("{} ", "a".repeat(2000));
        let result = validate_content(&padded, ChunkKind::Text);
        assert!(!result.is_valid);
        assert!(result.errors[0].contains("2001 characters"));
    }

    #[test]
    fn test_text_at_limit_is_valid() {
        let result = validate_content(&"a".repeat(2000), ChunkKind::Text);
        assert!(result.is_valid);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_empty_content_message_depends_on_kind() {
        let text = validate_content("", ChunkKind::Text);
        assert!(!text.is_valid);
        assert!(text.errors[0].contains("empty"));

        let code = validate_content("   \n", ChunkKind::ToolCall);
        assert_eq!(code.errors, vec!["Code cannot be empty".to_string()]);

        let tool_result = validate_content("", ChunkKind::ToolResult);
        assert_eq!(tool_result.errors, vec!["Tool result cannot be empty".to_string()]);
    }

    #[test]
    fn test_no_length_checks_for_tool_kinds() {
        let long = "x".repeat(5000);
        assert!(validate_content(&long, ChunkKind::ToolCall).is_valid);
        assert!(validate_content("1", ChunkKind::ToolResult).warnings.is_empty());
    }

    #[test]
    fn test_metadata_short_name_and_missing_description() {
        let result = validate_metadata("ab", "");
        assert!(!result.is_valid);
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("at least 3 characters")));
        assert!(result.warnings.iter().any(|w| w.contains("description")));
    }

    #[test]
    fn test_metadata_long_description() {
        let result = validate_metadata("Valid Name", &"x".repeat(501));
        assert!(!result.is_valid);
        assert_eq!(
            result.errors,
            vec!["Description cannot exceed 500 characters".to_string()]
        );
    }

    #[test]
    fn test_metadata_name_bounds() {
        assert_eq!(
            validate_metadata("", "desc").errors,
            vec!["Name is required".to_string()]
        );
        assert!(validate_metadata(&"n".repeat(101), "desc").errors[0].contains("100"));
        assert!(validate_metadata("Arithmetic", "Adds numbers").is_valid);
    }
}
