//! The closed set of read-only exploration tools.
//!
//! Every tool takes JSON arguments, never fails at the Rust level, and returns
//! the text the reasoning engine sees. Argument validation happens once in
//! [`ToolRegistry::dispatch`] against each tool's JSON Schema.

mod deps;
mod read;
mod search;
pub mod security;
mod tree;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use anyhow::{Context, Result};
use jsonschema::{Draft, Validator};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::core::memory::ToolObservation;
use crate::io::config::ToolLimits;
use crate::io::engine::{ToolRequest, ToolSchema};

pub(crate) const RULE: &str = "──────────────────────────────────────────────────";

/// Repository root plus the limits every tool reads.
#[derive(Debug, Clone)]
pub struct ToolContext {
    root: PathBuf,
    limits: ToolLimits,
}

impl ToolContext {
    pub fn new(root: &Path, limits: ToolLimits) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("resolve repository {}", root.display()))?;
        if !root.is_dir() {
            anyhow::bail!("repository {} is not a directory", root.display());
        }
        Ok(Self { root, limits })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn limits(&self) -> &ToolLimits {
        &self.limits
    }
}

pub(crate) fn arg_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

pub(crate) fn arg_bool(args: &Value, key: &str) -> Option<bool> {
    args.get(key).and_then(Value::as_bool)
}

pub(crate) fn arg_usize(args: &Value, key: &str) -> Option<usize> {
    args.get(key)
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    ReadFile,
    SearchCode,
    FindFiles,
    ListDirectory,
    AnalyzeDependencies,
}

impl ToolKind {
    pub const ALL: [ToolKind; 5] = [
        ToolKind::ReadFile,
        ToolKind::SearchCode,
        ToolKind::FindFiles,
        ToolKind::ListDirectory,
        ToolKind::AnalyzeDependencies,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ReadFile => "read_file",
            Self::SearchCode => "search_code",
            Self::FindFiles => "find_files_by_pattern",
            Self::ListDirectory => "list_directory_structure",
            Self::AnalyzeDependencies => "analyze_dependencies",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// How a result of this tool, called with `args`, feeds working memory.
    /// Reads take their path from the output header.
    pub fn observation(self, args: &Value) -> ToolObservation<'_> {
        match self {
            Self::ReadFile => ToolObservation::Read { path: None },
            Self::SearchCode => arg_str(args, "pattern")
                .map_or(ToolObservation::Ignored, |pattern| ToolObservation::Search { pattern }),
            Self::FindFiles | Self::ListDirectory | Self::AnalyzeDependencies => {
                ToolObservation::Ignored
            }
        }
    }

    pub fn descriptor(self) -> ToolDescriptor {
        match self {
            Self::ReadFile => ToolDescriptor {
                kind: self,
                description: "Read a file from the repository with line numbers. You must read a \
                              file before citing any of its lines.",
                arg_schema: json!({
                    "type": "object",
                    "properties": {
                        "file_path": {"type": "string", "description": "Path relative to the repository root"},
                        "start_line": {"type": "integer", "minimum": 1},
                        "max_lines": {"type": "integer", "minimum": 1},
                        "force": {"type": "boolean", "description": "Read even if the file looks generated or empty"}
                    },
                    "required": ["file_path"],
                    "additionalProperties": false
                }),
                invoke: read::read_file,
                format_status: |args| {
                    format!("Reading {}", arg_str(args, "file_path").unwrap_or("file"))
                },
            },
            Self::SearchCode => ToolDescriptor {
                kind: self,
                description: "Search file contents with a regular expression. Returns \
                              path:line:content rows.",
                arg_schema: json!({
                    "type": "object",
                    "properties": {
                        "pattern": {"type": "string", "minLength": 1},
                        "file_extension": {"type": "string", "description": "Only search files with this extension, e.g. py"},
                        "max_results": {"type": "integer", "minimum": 1}
                    },
                    "required": ["pattern"],
                    "additionalProperties": false
                }),
                invoke: search::search_code,
                format_status: |args| {
                    format!("Searching for '{}'", arg_str(args, "pattern").unwrap_or(""))
                },
            },
            Self::FindFiles => ToolDescriptor {
                kind: self,
                description: "Find files whose path matches a glob pattern such as **/*.py.",
                arg_schema: json!({
                    "type": "object",
                    "properties": {
                        "pattern": {"type": "string", "minLength": 1},
                        "max_results": {"type": "integer", "minimum": 1}
                    },
                    "required": ["pattern"],
                    "additionalProperties": false
                }),
                invoke: search::find_files,
                format_status: |args| {
                    format!("Finding files '{}'", arg_str(args, "pattern").unwrap_or(""))
                },
            },
            Self::ListDirectory => ToolDescriptor {
                kind: self,
                description: "Show the directory tree of the repository or a subdirectory.",
                arg_schema: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string"},
                        "max_depth": {"type": "integer", "minimum": 1}
                    },
                    "additionalProperties": false
                }),
                invoke: tree::list_directory,
                format_status: |args| {
                    format!("Listing {}", arg_str(args, "path").unwrap_or("."))
                },
            },
            Self::AnalyzeDependencies => ToolDescriptor {
                kind: self,
                description: "Summarize declared dependencies from manifest files \
                              (Cargo.toml, package.json, requirements.txt, pyproject.toml, go.mod).",
                arg_schema: json!({
                    "type": "object",
                    "properties": {},
                    "additionalProperties": false
                }),
                invoke: deps::analyze_dependencies,
                format_status: |_| "Analyzing dependencies".to_string(),
            },
        }
    }
}

pub type ToolFn = fn(&ToolContext, &Value) -> String;

pub struct ToolDescriptor {
    pub kind: ToolKind,
    pub description: &'static str,
    pub arg_schema: Value,
    pub invoke: ToolFn,
    pub format_status: fn(&Value) -> String,
}

impl ToolDescriptor {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    validator: Validator,
}

/// Descriptors with compiled argument validators, bound to one repository.
pub struct ToolRegistry {
    ctx: ToolContext,
    tools: Vec<RegisteredTool>,
}

impl ToolRegistry {
    pub fn new(ctx: ToolContext) -> Result<Self> {
        let tools = ToolKind::ALL
            .into_iter()
            .map(|kind| {
                let descriptor = kind.descriptor();
                let validator = jsonschema::options()
                    .with_draft(Draft::Draft202012)
                    .build(&descriptor.arg_schema)
                    .map_err(|err| anyhow::anyhow!("compile schema for {}: {err}", kind.name()))?;
                Ok(RegisteredTool {
                    descriptor,
                    validator,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { ctx, tools })
    }

    pub fn context(&self) -> &ToolContext {
        &self.ctx
    }

    /// Schemas advertised to the reasoning engine.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .iter()
            .map(|tool| ToolSchema {
                name: tool.descriptor.name().to_string(),
                description: tool.descriptor.description.to_string(),
                parameters: tool.descriptor.arg_schema.clone(),
            })
            .collect()
    }

    fn find(&self, name: &str) -> Option<&RegisteredTool> {
        let kind = ToolKind::from_name(name)?;
        self.tools.iter().find(|tool| tool.descriptor.kind == kind)
    }

    /// Human-readable progress line for a pending call.
    pub fn status_line(&self, name: &str, args: &Value) -> String {
        match self.find(name) {
            Some(tool) => (tool.descriptor.format_status)(args),
            None => format!("Running {name}"),
        }
    }

    /// Run one tool. Unknown names and schema violations come back as
    /// `Error:` text so the engine can correct itself.
    pub fn dispatch(&self, name: &str, args: &Value) -> String {
        let Some(tool) = self.find(name) else {
            warn!(tool = name, "unknown tool requested");
            return format!("Error: unknown tool '{name}'");
        };
        let violations: Vec<String> = tool
            .validator
            .iter_errors(args)
            .map(|err| err.to_string())
            .collect();
        if !violations.is_empty() {
            debug!(tool = name, ?violations, "rejected tool arguments");
            return format!(
                "Error: invalid arguments for {name}: {}",
                violations.join("; ")
            );
        }
        debug!(tool = name, "dispatching tool");
        (tool.descriptor.invoke)(&self.ctx, args)
    }

    /// Run a batch of calls on up to `max_parallel` threads. Outputs are
    /// returned in request order.
    pub fn dispatch_batch(&self, requests: &[ToolRequest], max_parallel: usize) -> Vec<String> {
        let workers = max_parallel.clamp(1, requests.len().max(1));
        if workers == 1 {
            return requests
                .iter()
                .map(|req| self.dispatch(&req.name, &req.args))
                .collect();
        }

        let next = AtomicUsize::new(0);
        let mut results: Vec<(usize, String)> = thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(|| {
                        let mut done = Vec::new();
                        loop {
                            let idx = next.fetch_add(1, Ordering::Relaxed);
                            let Some(req) = requests.get(idx) else {
                                break;
                            };
                            done.push((idx, self.dispatch(&req.name, &req.args)));
                        }
                        done
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|handle| match handle.join() {
                    Ok(done) => done,
                    Err(_) => {
                        warn!("tool worker panicked");
                        Vec::new()
                    }
                })
                .collect()
        });
        results.sort_by_key(|(idx, _)| *idx);

        let mut outputs = Vec::with_capacity(requests.len());
        let mut results = results.into_iter().peekable();
        for idx in 0..requests.len() {
            match results.next_if(|(done, _)| *done == idx) {
                Some((_, output)) => outputs.push(output),
                None => outputs.push(format!(
                    "Error: {} did not complete",
                    requests[idx].name
                )),
            }
        }
        outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (tempfile::TempDir, ToolRegistry) {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(temp.path().join("src")).expect("mkdir");
        std::fs::write(temp.path().join("src/app.py"), "def run():\n    return 1\n").expect("write");
        std::fs::write(temp.path().join("src/util.py"), "def helper():\n    pass\n").expect("write");
        let ctx = ToolContext::new(temp.path(), ToolLimits::default()).expect("ctx");
        (temp, ToolRegistry::new(ctx).expect("registry"))
    }

    fn request(id: &str, name: &str, args: Value) -> ToolRequest {
        ToolRequest {
            id: id.to_string(),
            name: name.to_string(),
            args,
        }
    }

    #[test]
    fn tool_names_round_trip() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ToolKind::from_name("write_file"), None);
    }

    #[test]
    fn observations_follow_tool_kind() {
        let args = json!({"pattern": "login", "file_path": "a.py"});
        assert_eq!(
            ToolKind::ReadFile.observation(&args),
            ToolObservation::Read { path: None }
        );
        assert_eq!(
            ToolKind::SearchCode.observation(&args),
            ToolObservation::Search { pattern: "login" }
        );
        assert_eq!(
            ToolKind::SearchCode.observation(&json!({})),
            ToolObservation::Ignored
        );
        assert_eq!(
            ToolKind::FindFiles.observation(&args),
            ToolObservation::Ignored
        );
    }

    #[test]
    fn schemas_cover_every_tool() {
        let (_temp, registry) = registry();
        let names: Vec<String> = registry.schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                "read_file",
                "search_code",
                "find_files_by_pattern",
                "list_directory_structure",
                "analyze_dependencies"
            ]
        );
    }

    #[test]
    fn unknown_tool_is_an_error_string() {
        let (_temp, registry) = registry();
        assert_eq!(
            registry.dispatch("delete_repo", &json!({})),
            "Error: unknown tool 'delete_repo'"
        );
    }

    #[test]
    fn schema_violations_are_reported() {
        let (_temp, registry) = registry();
        let out = registry.dispatch("read_file", &json!({"path": "src/app.py"}));
        assert!(out.starts_with("Error: invalid arguments for read_file:"), "{out}");
        let out = registry.dispatch("read_file", &json!({"file_path": "src/app.py", "start_line": 0}));
        assert!(out.starts_with("Error: invalid arguments for read_file:"), "{out}");
    }

    #[test]
    fn status_lines_describe_the_call() {
        let (_temp, registry) = registry();
        assert_eq!(
            registry.status_line("read_file", &json!({"file_path": "src/app.py"})),
            "Reading src/app.py"
        );
        assert_eq!(
            registry.status_line("search_code", &json!({"pattern": "def"})),
            "Searching for 'def'"
        );
    }

    #[test]
    fn batch_outputs_keep_request_order() {
        let (_temp, registry) = registry();
        let requests = vec![
            request("1", "read_file", json!({"file_path": "src/util.py"})),
            request("2", "read_file", json!({"file_path": "src/app.py"})),
            request("3", "nope", json!({})),
            request("4", "read_file", json!({"file_path": "src/util.py"})),
        ];
        let parallel = registry.dispatch_batch(&requests, 3);
        let serial = registry.dispatch_batch(&requests, 1);
        assert_eq!(parallel, serial);
        assert!(parallel[0].starts_with("📄 src/util.py"));
        assert!(parallel[1].starts_with("📄 src/app.py"));
        assert_eq!(parallel[2], "Error: unknown tool 'nope'");
    }
}
