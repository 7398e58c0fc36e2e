//! Repository containment, secret-file blocking, and prompt-injection scrubbing.
//!
//! Pattern tables are compiled once and shared by every tool.

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

use crate::core::tool_text::normalize_path;

pub const FILTERED_LINE: &str = "[FILTERED] potential prompt injection removed";

const SENSITIVE_FILES: &[&str] = &[
    ".env",
    "credentials.json",
    "credentials.yaml",
    "credentials.yml",
    "secrets.json",
    "secrets.yaml",
    "secrets.yml",
    "service-account.json",
    "service_account.json",
    "id_rsa",
    "id_rsa.pub",
    "id_ed25519",
    "id_ed25519.pub",
    "id_dsa",
    "id_ecdsa",
    ".npmrc",
    ".pypirc",
    ".netrc",
];

const SENSITIVE_EXTENSIONS: &[&str] = &["pem", "key", "p12", "pfx"];

const SENSITIVE_DIRS: &[&str] = &[".aws", ".gcloud", ".ssh"];

const IGNORE_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".scout",
    "node_modules",
    "target",
    "__pycache__",
    ".venv",
    "venv",
    "env",
    "dist",
    "build",
    ".next",
    ".nuxt",
    "coverage",
    ".pytest_cache",
    ".mypy_cache",
    ".tox",
    ".idea",
    ".vscode",
];

const INJECTION_PATTERNS: &[&str] = &[
    r"ignore\s+(all\s+)?previous\s+instructions",
    r"forget\s+(all\s+)?(your\s+)?previous",
    r"disregard\s+(all\s+)?prior",
    r"system\s*:\s*you\s+are",
    r"<\|im_start\|>",
    r"<\|im_end\|>",
    r"\[INST\]",
    r"\[/INST\]",
    r"<\|system\|>",
    r"<\|user\|>",
    r"<\|assistant\|>",
    r"ignore\s+(?:the\s+)?(?:above|previous|prior)\s+(?:instructions?|prompts?|context)",
    r"new\s+instructions?\s*:",
    r"override\s+(?:all\s+)?(?:previous\s+)?(?:instructions?|settings?)",
    r"you\s+are\s+now\s+(?:a|an)\s+",
    r"pretend\s+(?:you\s+are|to\s+be)\s+",
    r"roleplay\s+as\s+",
    r"jailbreak",
    r"bypass\s+(?:all\s+)?(?:restrictions?|filters?|rules?)",
    r"do\s+not\s+follow\s+(?:your\s+)?(?:instructions?|guidelines?)",
];

static INJECTION_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    INJECTION_PATTERNS
        .iter()
        .map(|pattern| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .expect("injection pattern should compile")
        })
        .collect()
});

pub fn is_ignored_dir(name: &str) -> bool {
    IGNORE_DIRS.contains(&name) || name.ends_with(".egg-info")
}

/// True for files that typically hold secrets or credentials.
pub fn is_sensitive(relative: &Path) -> bool {
    let name = relative
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if SENSITIVE_FILES.contains(&name.as_str()) || name.starts_with(".env.") {
        return true;
    }
    let extension = relative
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if SENSITIVE_EXTENSIONS.contains(&extension.as_str()) {
        return true;
    }
    relative.components().any(|component| match component {
        Component::Normal(part) => SENSITIVE_DIRS.contains(&part.to_string_lossy().as_ref()),
        _ => false,
    })
}

/// Resolve a tool-supplied path to a canonical file inside `root`.
///
/// `root` must already be canonical. The error is the tool output to return.
pub fn resolve_in_repo(root: &Path, requested: &str) -> Result<PathBuf, String> {
    let trimmed = normalize_path(requested);
    if trimmed.is_empty() {
        return Err("Error: file_path must not be empty".to_string());
    }
    let candidate = if Path::new(trimmed).is_absolute() {
        PathBuf::from(trimmed)
    } else {
        root.join(trimmed)
    };
    let canonical = match candidate.canonicalize() {
        Ok(path) => path,
        Err(_) => return Err(format!("Error: File '{requested}' does not exist")),
    };
    if !canonical.starts_with(root) {
        return Err(format!(
            "[BLOCKED] Path '{requested}' is outside the repository"
        ));
    }
    Ok(canonical)
}

/// `path` relative to `root`, with `/` separators.
pub fn display_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn looks_like_injection(line: &str) -> bool {
    INJECTION_RES.iter().any(|re| re.is_match(line))
}

/// Replace lines that look like prompt injection. Returns the scrubbed lines
/// (one per input line, so numbering is preserved) and how many were replaced.
pub fn scrub_lines<'a>(lines: impl Iterator<Item = &'a str>) -> (Vec<&'a str>, usize) {
    let mut filtered = 0;
    let scrubbed = lines
        .map(|line| {
            if looks_like_injection(line) {
                filtered += 1;
                FILTERED_LINE
            } else {
                line
            }
        })
        .collect();
    (scrubbed, filtered)
}

/// First bytes contain a NUL.
pub fn is_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8000).any(|b| *b == 0)
}
