//! Code analyzer: cheap static checks for tool_call code.
//!
//! Two passes over the code, both linear in its length:
//! - **Unsafe patterns**: a fixed regex table applied line by line. Matches
//!   become warnings and never affect validity.
//! - **Bracket balance**: running counts of `(`, `[`, `{`. An unmatched
//!   closer is a syntax error on its line; leftover openers are reported on
//!   the last line.
//!
//! Safe to call on every keystroke.

use std::sync::OnceLock;

use regex::Regex;

use crate::validation::{SyntaxError, ValidationResult};

/// Unsafe-pattern table: (pattern, reason).
const UNSAFE_PATTERNS: &[(&str, &str)] = &[
    (r"^\s*(?:import\s+os\b|from\s+os\b)", "Restricted OS access (os module)"),
    (r"^\s*(?:import\s+sys\b|from\s+sys\b)", "Restricted system access (sys module)"),
    (
        r"^\s*(?:import\s+subprocess\b|from\s+subprocess\b)",
        "Subprocess execution is not allowed (subprocess module)",
    ),
    (
        r"^\s*(?:import\s+shutil\b|from\s+shutil\b)",
        "Restricted file system operations (shutil module)",
    ),
    (r"\beval\s*\(", "Dynamic code evaluation (eval)"),
    (r"\bexec\s*\(", "Dynamic code execution (exec)"),
    (r"\b__import__\s*\(", "Dynamic import (__import__)"),
    (r"\bopen\s*\(", "Unrestricted file access (open)"),
    (r"^\s*while\s+(?:True|1)\s*:", "Potential infinite loop (while True)"),
];

const BRACKETS: [(char, char); 3] = [('(', ')'), ('[', ']'), ('{', '}')];

fn unsafe_patterns() -> &'static [(Regex, &'static str)] {
    static COMPILED: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        UNSAFE_PATTERNS
            .iter()
            .filter_map(|(pattern, reason)| match Regex::new(pattern) {
                Ok(re) => Some((re, *reason)),
                Err(e) => {
                    tracing::error!(pattern = %pattern, error = %e, "Invalid unsafe pattern");
                    None
                }
            })
            .collect()
    })
}

/// Analyze a code chunk.
///
/// Empty or whitespace-only code yields a single error and skips every other
/// check.
pub fn analyze(code: &str) -> ValidationResult {
    let mut result = ValidationResult::valid();

    if code.trim().is_empty() {
        result.push_error("Code cannot be empty");
        return result;
    }

    let patterns = unsafe_patterns();
    let mut open = [0usize; 3];
    let mut last_line = 1;

    for (index, line) in code.lines().enumerate() {
        let line_no = index + 1;
        last_line = line_no;

        for (re, reason) in patterns {
            if re.is_match(line) {
                result.push_warning(format!("Line {}: {}", line_no, reason));
            }
        }

        for ch in line.chars() {
            for (slot, (opener, closer)) in BRACKETS.iter().enumerate() {
                if ch == *opener {
                    open[slot] += 1;
                } else if ch == *closer {
                    if open[slot] == 0 {
                        result.syntax_errors.push(SyntaxError {
                            line: line_no,
                            message: format!("Unmatched closing bracket '{}'", closer),
                        });
                    } else {
                        open[slot] -= 1;
                    }
                }
            }
        }
    }

    for (slot, (opener, _)) in BRACKETS.iter().enumerate() {
        if open[slot] > 0 {
            result.syntax_errors.push(SyntaxError {
                line: last_line,
                message: format!("Unclosed bracket '{}' ({} left open)", opener, open[slot]),
            });
        }
    }

    result.settle()
}
