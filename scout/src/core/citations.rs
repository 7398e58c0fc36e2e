//! Citation extraction over answer text.
//!
//! Two surface syntaxes are recognized:
//!
//! - `path/to/file.ext:NNN`, bare or wrapped in backticks, brackets, parentheses
//! - the backtick-hyphen form `` `file.ext`-NNN `` (optionally double-backticked)
//!
//! Line numbers longer than seven digits are rejected; those are almost always
//! timestamps or version strings rather than references.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::Citation;

pub const MAX_LINE_DIGITS: usize = 7;

/// Extensions accepted as source-like files.
pub const CITABLE_EXTENSIONS: &[&str] = &[
    "py", "pyi", "js", "jsx", "mjs", "cjs", "ts", "tsx", "go", "rs", "java", "kt", "kts", "scala",
    "rb", "php", "cs", "c", "h", "cc", "cpp", "hpp", "hh", "swift", "m", "mm", "sh", "bash", "zsh",
    "sql", "html", "css", "scss", "vue", "svelte", "json", "yaml", "yml", "toml", "md", "rst",
    "txt", "xml", "gradle", "cfg", "ini", "lock", "proto", "graphql", "ex", "exs", "erl", "hs",
    "lua", "r", "dart", "tf",
];

pub(crate) const PATH_CHARS: &str = r"[A-Za-z0-9_./\\-]";

pub(crate) fn file_pattern() -> String {
    format!(
        r"[A-Za-z0-9_./]{PATH_CHARS}*\.(?:{})",
        CITABLE_EXTENSIONS.join("|")
    )
}

pub(crate) static COLON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?P<file>{}):(?P<line>\d+)", file_pattern()))
        .expect("colon citation regex should compile")
});

pub(crate) static HYPHEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"``?(?P<file>{})`-(?P<line>\d+)`?", file_pattern()))
        .expect("hyphen citation regex should compile")
});

/// Extract de-duplicated citations in order of first appearance.
pub fn extract_citations(text: &str) -> Vec<Citation> {
    let mut found: Vec<(usize, Citation)> = Vec::new();
    for re in [&*COLON_RE, &*HYPHEN_RE] {
        for caps in re.captures_iter(text) {
            let (Some(whole), Some(file), Some(line)) =
                (caps.get(0), caps.name("file"), caps.name("line"))
            else {
                continue;
            };
            let Some(line) = parse_line(line.as_str()) else {
                continue;
            };
            found.push((whole.start(), Citation::new(file.as_str(), line)));
        }
    }
    found.sort_by_key(|(pos, _)| *pos);

    let mut seen = HashSet::new();
    found
        .into_iter()
        .map(|(_, citation)| citation)
        .filter(|citation| seen.insert(citation.clone()))
        .collect()
}

pub(crate) fn parse_line(digits: &str) -> Option<u32> {
    if digits.len() > MAX_LINE_DIGITS {
        return None;
    }
    digits.parse().ok().filter(|line| *line > 0)
}

/// Render citations in the canonical backticked colon form.
pub fn render_citations(citations: &[Citation]) -> String {
    citations
        .iter()
        .map(|citation| format!("`{citation}`"))
        .collect::<Vec<_>>()
        .join(", ")
}
