//! Static write-clause guard for `search_graph`.
//!
//! Matching is token-level: comments and string literals are stripped first,
//! then write clauses are matched case-insensitively with word boundaries.
//! A property named `created_at` or `dataset` never trips the guard; an
//! actual `SET`/`CREATE`/`CALL db.*` clause always does.

use crate::errors::OrchestratorError;
use once_cell::sync::Lazy;
use regex::Regex;

static WRITE_CLAUSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:CREATE|MERGE|DELETE|REMOVE|SET|DROP)\b|(?i)\bCALL\s+db\.")
        .unwrap()
});

/// Reject queries with write semantics before any I/O happens
pub fn ensure_read_only(query: &str) -> Result<(), OrchestratorError> {
    let stripped = strip_comments_and_strings(query);
    if let Some(found) = WRITE_CLAUSE.find(&stripped) {
        return Err(OrchestratorError::WriteForbidden(format!(
            "clause '{}' is not allowed in a read query",
            found.as_str().trim().to_uppercase()
        )));
    }
    Ok(())
}

/// Replace `//` line comments, `/* */` block comments and quoted string
/// literals with spaces, preserving everything else.
fn strip_comments_and_strings(query: &str) -> String {
    #[derive(PartialEq)]
    enum Mode {
        Normal,
        LineComment,
        BlockComment,
        Single,
        Double,
    }

    let mut out = String::with_capacity(query.len());
    let mut mode = Mode::Normal;
    let mut chars = query.chars().peekable();

    while let Some(c) = chars.next() {
        match mode {
            Mode::Normal => match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    mode = Mode::LineComment;
                    out.push(' ');
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    mode = Mode::BlockComment;
                    out.push(' ');
                }
                '\'' => {
                    mode = Mode::Single;
                    out.push(' ');
                }
                '"' => {
                    mode = Mode::Double;
                    out.push(' ');
                }
                other => out.push(other),
            },
            Mode::LineComment => {
                if c == '\n' {
                    mode = Mode::Normal;
                    out.push('\n');
                }
            }
            Mode::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    mode = Mode::Normal;
                }
            }
            Mode::Single => match c {
                '\\' => {
                    chars.next();
                }
                '\'' => mode = Mode::Normal,
                _ => {}
            },
            Mode::Double => match c {
                '\\' => {
                    chars.next();
                }
                '"' => mode = Mode::Normal,
                _ => {}
            },
        }
    }
    out
}
