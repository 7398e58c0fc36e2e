//! Parsers for the textual conventions tool outputs follow.
//!
//! File reads start with a `📄 {name} ({total} lines)` header followed by
//! `NNN | content` rows. Search results are `path:line:content` rows. The
//! verifier and working memory both rely on these shapes, so the parsing lives
//! in one place.

use std::sync::LazyLock;

use regex::Regex;

pub const READ_HEADER_MARKER: &str = "📄";
pub const SEARCH_HEADER_MARKER: &str = "🔍";

static READ_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^📄\s+(?P<name>.+?)(?:\s+\((?P<total>\d+)\s+lines?\))?\s*$")
        .expect("read header regex should compile")
});

static SEARCH_ROW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<path>[^:\s][^:]*):(?P<line>\d+):").expect("search row regex should compile")
});

/// Header of a file-read output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadHeader<'a> {
    pub name: &'a str,
    pub total_lines: Option<u32>,
}

/// Parse the header of a read-file output. Returns `None` for anything that is
/// not a file read (errors, search results, directory listings).
pub fn parse_read_header(output: &str) -> Option<ReadHeader<'_>> {
    let first = output.lines().find(|line| !line.trim().is_empty())?;
    let caps = READ_HEADER_RE.captures(first.trim())?;
    let name = caps.name("name")?.as_str().trim();
    let total_lines = caps
        .name("total")
        .and_then(|total| total.as_str().parse().ok());
    Some(ReadHeader { name, total_lines })
}

/// Iterate `(line_number, content)` for every `NNN | content` row.
pub fn numbered_rows(output: &str) -> impl Iterator<Item = (u32, &str)> {
    output.lines().filter_map(parse_row)
}

/// Content of row `line`, trimmed, if the output contains it.
pub fn row_content(output: &str, line: u32) -> Option<&str> {
    numbered_rows(output)
        .find(|(number, _)| *number == line)
        .map(|(_, content)| content.trim())
}

fn parse_row(line: &str) -> Option<(u32, &str)> {
    let (number, content) = line.split_once('|')?;
    let number = number.trim();
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((number.parse().ok()?, content))
}

/// Strip leading `./` segments.
pub fn normalize_path(path: &str) -> &str {
    let mut path = path.trim();
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    path
}

/// Last path component.
pub fn file_name(path: &str) -> &str {
    let path = normalize_path(path).trim_end_matches('/');
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// True when two paths plausibly name the same file: equal after
/// normalization, or one is a component-aligned suffix of the other.
pub fn same_file(a: &str, b: &str) -> bool {
    let a = normalize_path(a);
    let b = normalize_path(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a == b || is_suffix_path(a, b) || is_suffix_path(b, a)
}

fn is_suffix_path(long: &str, short: &str) -> bool {
    long.len() > short.len()
        && long.ends_with(short)
        && matches!(long.as_bytes()[long.len() - short.len() - 1], b'/' | b'\\')
}

/// Paths of `path:line:` rows in a search output, in order of appearance.
pub fn search_result_paths(output: &str) -> Vec<&str> {
    output
        .lines()
        .filter_map(|line| SEARCH_ROW_RE.captures(line))
        .filter_map(|caps| caps.name("path").map(|m| m.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const READ: &str = "📄 src/main.py (10 lines)\n──────────\n   1 | import os\n   5 | def foo():\n";

    #[test]
    fn parses_header_with_total() {
        let header = parse_read_header(READ).expect("header");
        assert_eq!(header.name, "src/main.py");
        assert_eq!(header.total_lines, Some(10));
    }

    #[test]
    fn parses_header_without_total() {
        let header = parse_read_header("📄 notes.txt\n   1 | hi").expect("header");
        assert_eq!(header.name, "notes.txt");
        assert_eq!(header.total_lines, None);
    }

    #[test]
    fn singular_line_header() {
        let header = parse_read_header("📄 a.rs (1 line)").expect("header");
        assert_eq!(header.total_lines, Some(1));
    }

    #[test]
    fn error_outputs_have_no_header() {
        assert!(parse_read_header("Error: File 'x.py' does not exist").is_none());
        assert!(parse_read_header("🔍 Search results for 'foo':").is_none());
        assert!(parse_read_header("").is_none());
    }

    #[test]
    fn finds_row_content() {
        assert_eq!(row_content(READ, 5), Some("def foo():"));
        assert_eq!(row_content(READ, 50), None);
    }

    #[test]
    fn row_parser_ignores_pipes_in_prose() {
        let rows: Vec<_> = numbered_rows("a | b\n  12 | x | y\n").collect();
        assert_eq!(rows, vec![(12, " x | y")]);
    }

    #[test]
    fn same_file_requires_component_boundary() {
        assert!(same_file("main.py", "./main.py"));
        assert!(same_file("src/main.py", "main.py"));
        assert!(same_file("main.py", "/repo/src/main.py"));
        assert!(!same_file("myapp.py", "app.py"));
        assert!(!same_file("", "app.py"));
    }

    #[test]
    fn file_name_takes_last_component() {
        assert_eq!(file_name("./src/lib.rs"), "lib.rs");
        assert_eq!(file_name("lib.rs"), "lib.rs");
    }

    #[test]
    fn collects_search_paths() {
        let out = "🔍 Search results for 'foo':\n─────\nsrc/a.rs:3:fn foo()\nsrc/b.rs:10:foo();\n";
        assert_eq!(search_result_paths(out), vec!["src/a.rs", "src/b.rs"]);
    }
}
