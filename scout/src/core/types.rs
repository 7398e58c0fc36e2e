//! Shared deterministic types for the exploration core.
//!
//! These are plain data carriers passed between memory, ledger, extraction,
//! and verification. Nothing here performs I/O.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One tool invocation and the text it produced.
///
/// Appended to the session ledger and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub args: Value,
    pub output: String,
}

/// A `file:line` reference found in answer text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Citation {
    pub file: String,
    pub line: u32,
}

impl Citation {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Keyword family that made a sentence count as a factual claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimKind {
    Location,
    Functionality,
    Structure,
    Dependency,
}

impl ClaimKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Location => "location",
            Self::Functionality => "functionality",
            Self::Structure => "structure",
            Self::Dependency => "dependency",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub text: String,
    pub kind: ClaimKind,
    pub citation: Option<Citation>,
}

/// A file the read tool returned during the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReadRecord {
    pub path: String,
    pub lines_read: usize,
    /// Highest line number the tool reported for the file, when known.
    pub max_line: Option<u32>,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRecord {
    pub pattern: String,
    pub result_count: usize,
    pub key_files: Vec<String>,
}

/// A statement recorded together with the citation that supports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedFact {
    pub text: String,
    pub citation: String,
}
