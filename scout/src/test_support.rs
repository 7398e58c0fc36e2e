//! Test-only helpers: a scripted reasoning engine and throwaway repositories.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::core::engine_error::{EngineErrorKind, EngineInvocationError};
use crate::io::config::ToolLimits;
use crate::io::engine::{
    DeltaStream, EngineDelta, EngineReply, EngineRequest, ReasoningEngine, ToolRequest,
};
use crate::io::tools::{ToolContext, ToolRegistry};

pub type ScriptedReply = Result<EngineReply, EngineInvocationError>;

/// Replays canned replies in order and records every request it receives.
///
/// Streaming splits text replies at spaces so callers see several tokens.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    replies: RefCell<VecDeque<ScriptedReply>>,
    requests: RefCell<Vec<EngineRequest>>,
}

impl ScriptedEngine {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: RefCell::new(replies.into_iter().collect()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn text(text: &str) -> ScriptedReply {
        Ok(EngineReply::Text(text.to_string()))
    }

    pub fn tools(calls: Vec<ToolRequest>) -> ScriptedReply {
        Ok(EngineReply::ToolCalls(calls))
    }

    pub fn requests(&self) -> Vec<EngineRequest> {
        self.requests.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.borrow().len()
    }
}

impl ReasoningEngine for ScriptedEngine {
    fn model_id(&self) -> &str {
        "scripted/test"
    }

    fn respond(&self, request: &EngineRequest) -> Result<EngineReply, EngineInvocationError> {
        self.requests.borrow_mut().push(request.clone());
        self.replies.borrow_mut().pop_front().unwrap_or_else(|| {
            Err(EngineInvocationError::new(
                EngineErrorKind::Other,
                "scripted engine has no replies left",
            ))
        })
    }

    fn stream<'e>(&'e self, request: &EngineRequest) -> Result<DeltaStream<'e>, EngineInvocationError> {
        let deltas: Vec<EngineDelta> = match self.respond(request)? {
            EngineReply::Text(text) => text
                .split_inclusive(' ')
                .map(|chunk| EngineDelta::Text(chunk.to_string()))
                .collect(),
            EngineReply::ToolCalls(calls) => calls.into_iter().map(EngineDelta::ToolCall).collect(),
        };
        Ok(Box::new(deltas.into_iter().map(Ok)))
    }
}

pub fn tool_call(id: &str, name: &str, args: Value) -> ToolRequest {
    ToolRequest {
        id: id.to_string(),
        name: name.to_string(),
        args,
    }
}

/// A temporary repository populated file by file.
pub struct TestRepo {
    dir: tempfile::TempDir,
}

impl TestRepo {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp repo"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, rel: &str, contents: &str) -> &Self {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(&path, contents).expect("write repo file");
        self
    }

    pub fn tools(&self) -> ToolRegistry {
        let ctx = ToolContext::new(self.path(), ToolLimits::default()).expect("tool context");
        ToolRegistry::new(ctx).expect("tool registry")
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

/// Output shaped like a `read_file` result for `path` with the given lines.
pub fn numbered_read_output(path: &str, lines: &[&str]) -> String {
    let mut out = format!("📄 {path} ({} lines)\n{}\n", lines.len(), "─".repeat(50));
    for (idx, line) in lines.iter().enumerate() {
        out.push_str(&format!("{:>4} | {line}\n", idx + 1));
    }
    out
}
