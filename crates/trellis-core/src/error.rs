//! Error types for graph description parsing.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, ParseError>;

/// Errors raised while reading or parsing a directed-graph description.
///
/// Most callers never see these: [`crate::GraphParser::parse`] degrades any
/// grammar error into an empty graph. They surface only from the lower-level
/// [`crate::DotGraph::parse`] and from file-based entry points.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The description file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The lexer hit a character sequence that is not a valid token.
    #[error("unexpected character {found:?} at line {line}")]
    UnexpectedChar { found: char, line: u32 },

    /// A quoted string or HTML id ran off the end of the input.
    #[error("unterminated {what} starting at line {line}")]
    Unterminated { what: &'static str, line: u32 },

    /// The token stream did not match the grammar.
    #[error("expected {expected} at line {line}, found {found}")]
    UnexpectedToken {
        expected: &'static str,
        found: String,
        line: u32,
    },

    /// Subgraphs nest deeper than the parser accepts.
    #[error("subgraphs nested deeper than {limit} levels at line {line}")]
    TooDeep { limit: usize, line: u32 },
}

impl ParseError {
    /// Wraps an I/O error with the path that caused it.
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn unexpected(expected: &'static str, found: impl Into<String>, line: u32) -> Self {
        Self::UnexpectedToken {
            expected,
            found: found.into(),
            line,
        }
    }
}
