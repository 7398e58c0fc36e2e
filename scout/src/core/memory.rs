//! Session-scoped working memory.
//!
//! Records which files the read tool actually returned, which searches ran,
//! and which facts were confirmed with a citation. The read-set only grows
//! until [`WorkingMemory::reset`]; it gates which citations are allowed and is
//! rendered back to the reasoning engine each turn.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::core::tool_text::{
    normalize_path, numbered_rows, parse_read_header, same_file, search_result_paths,
};
use crate::core::types::{ConfirmedFact, FileReadRecord, SearchRecord};

const MAX_CITABLE_FILES_IN_SUMMARY: usize = 20;
const MAX_SEARCHES_IN_SUMMARY: usize = 5;
const MAX_KEY_FILES: usize = 5;
const SUMMARY_CHARS: usize = 100;

/// What a tool result can contribute to memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolObservation<'a> {
    /// A read. `path` overrides the name in the output header.
    Read { path: Option<&'a str> },
    Search { pattern: &'a str },
    Ignored,
}

#[derive(Debug, Clone, Default)]
pub struct WorkingMemory {
    read_paths: BTreeSet<String>,
    files: Vec<FileReadRecord>,
    searches: Vec<SearchRecord>,
    facts: Vec<ConfirmedFact>,
}

/// Counters for `/stats` and transcripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub files_read: usize,
    pub searches: usize,
    pub facts: usize,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_file_read(
        &mut self,
        path: &str,
        lines_read: usize,
        summary: &str,
        max_line: Option<u32>,
    ) {
        let path = normalize_path(path).to_string();
        self.read_paths.insert(path.clone());
        self.files.push(FileReadRecord {
            path,
            lines_read,
            max_line,
            summary: summary.chars().take(SUMMARY_CHARS).collect(),
        });
    }

    pub fn record_search(&mut self, pattern: &str, result_count: usize, key_files: Vec<String>) {
        self.searches.push(SearchRecord {
            pattern: pattern.to_string(),
            result_count,
            key_files,
        });
    }

    pub fn add_fact(&mut self, text: &str, citation: &str) {
        if self
            .facts
            .iter()
            .any(|fact| fact.text == text && fact.citation == citation)
        {
            return;
        }
        self.facts.push(ConfirmedFact {
            text: text.to_string(),
            citation: citation.to_string(),
        });
    }

    /// Exact match, or a component-aligned suffix match against any read path.
    pub fn was_read(&self, path: &str) -> bool {
        let path = normalize_path(path);
        self.read_paths.contains(path) || self.read_paths.iter().any(|read| same_file(read, path))
    }

    /// Highest line observed for `path` across all reads of it.
    pub fn max_line(&self, path: &str) -> Option<u32> {
        self.files
            .iter()
            .filter(|record| same_file(&record.path, path))
            .filter_map(|record| record.max_line)
            .max()
    }

    pub fn can_cite(&self, path: &str, line: u32) -> bool {
        self.was_read(path) && self.max_line(path).is_none_or(|max| line <= max)
    }

    pub fn files(&self) -> &[FileReadRecord] {
        &self.files
    }

    pub fn searches(&self) -> &[SearchRecord] {
        &self.searches
    }

    pub fn facts(&self) -> &[ConfirmedFact] {
        &self.facts
    }

    /// Distinct read paths with the highest line seen for each, sorted by path.
    pub fn citable_files(&self) -> Vec<(&str, Option<u32>)> {
        self.read_paths
            .iter()
            .map(|path| {
                let max = self
                    .files
                    .iter()
                    .filter(|record| &record.path == path)
                    .filter_map(|record| record.max_line)
                    .max();
                (path.as_str(), max)
            })
            .collect()
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            files_read: self.read_paths.len(),
            searches: self.searches.len(),
            facts: self.facts.len(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Feed a tool result into memory. Only successful reads and searches are
    /// recorded; error strings leave memory untouched.
    pub fn observe_tool_output(&mut self, observation: ToolObservation<'_>, output: &str) {
        match observation {
            ToolObservation::Read { path } => {
                let Some(header) = parse_read_header(output) else {
                    return;
                };
                let rows: Vec<(u32, &str)> = numbered_rows(output).collect();
                let max_line = header
                    .total_lines
                    .or_else(|| rows.iter().map(|(n, _)| *n).max());
                let summary = rows
                    .iter()
                    .map(|(_, content)| content.trim())
                    .find(|content| !content.is_empty())
                    .unwrap_or_default();
                let path = path.unwrap_or(header.name);
                self.record_file_read(path, rows.len(), summary, max_line);
            }
            ToolObservation::Search { pattern } => {
                let paths = search_result_paths(output);
                let mut key_files: Vec<String> = Vec::new();
                for path in &paths {
                    if key_files.len() >= MAX_KEY_FILES {
                        break;
                    }
                    if !key_files.iter().any(|seen| seen == path) {
                        key_files.push((*path).to_string());
                    }
                }
                self.record_search(pattern, paths.len(), key_files);
            }
            ToolObservation::Ignored => {}
        }
    }

    /// Briefing re-injected into the next engine turn.
    pub fn to_context_summary(&self, max_facts: usize) -> String {
        let mut out = String::from("## WORKING MEMORY\n\n");

        let citable = self.citable_files();
        if citable.is_empty() {
            out.push_str("### NO FILES READ YET\n");
            out.push_str("You must call read_file before citing any file:line.\n");
        } else {
            out.push_str("### FILES YOU CAN CITE (read with read_file):\n");
            for (path, max) in citable.iter().take(MAX_CITABLE_FILES_IN_SUMMARY) {
                match max {
                    Some(max) => out.push_str(&format!("- {path} (lines 1-{max})\n")),
                    None => out.push_str(&format!("- {path}\n")),
                }
            }
            if citable.len() > MAX_CITABLE_FILES_IN_SUMMARY {
                out.push_str(&format!(
                    "- ... and {} more\n",
                    citable.len() - MAX_CITABLE_FILES_IN_SUMMARY
                ));
            }
            out.push_str(
                "\n**CITATION RULE:** Only cite files listed above, and only line numbers \
                 inside the listed range. Read any other file before citing it.\n",
            );
        }

        if !self.searches.is_empty() {
            out.push_str("\n### Searches performed:\n");
            let skip = self.searches.len().saturating_sub(MAX_SEARCHES_IN_SUMMARY);
            for search in self.searches.iter().skip(skip) {
                out.push_str(&format!(
                    "- '{}' ({} results)\n",
                    search.pattern, search.result_count
                ));
            }
        }

        if !self.facts.is_empty() && max_facts > 0 {
            out.push_str("\n### Confirmed Facts:\n");
            let skip = self.facts.len().saturating_sub(max_facts);
            for fact in self.facts.iter().skip(skip) {
                out.push_str(&format!("- {} [{}]\n", fact.text, fact.citation));
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_normalized_paths() {
        let mut memory = WorkingMemory::new();
        memory.record_file_read("./src/main.py", 10, "import os", Some(10));
        assert!(memory.was_read("src/main.py"));
        assert!(memory.was_read("main.py"));
        assert!(memory.was_read("/abs/repo/src/main.py"));
        assert!(!memory.was_read("other.py"));
    }

    #[test]
    fn can_cite_respects_max_line() {
        let mut memory = WorkingMemory::new();
        memory.record_file_read("main.py", 10, "", Some(10));
        assert!(memory.can_cite("main.py", 10));
        assert!(!memory.can_cite("main.py", 11));
        assert!(!memory.can_cite("other.py", 1));
    }

    #[test]
    fn unknown_max_line_allows_any_line() {
        let mut memory = WorkingMemory::new();
        memory.record_file_read("main.py", 3, "", None);
        assert!(memory.can_cite("main.py", 999));
    }

    #[test]
    fn rereading_keeps_the_largest_bound() {
        let mut memory = WorkingMemory::new();
        memory.record_file_read("lib.rs", 50, "", Some(50));
        memory.record_file_read("lib.rs", 80, "", Some(80));
        assert_eq!(memory.max_line("lib.rs"), Some(80));
        assert_eq!(memory.stats().files_read, 1);
    }

    #[test]
    fn observes_read_output() {
        let mut memory = WorkingMemory::new();
        let output = "📄 src/app.py (42 lines)\n────\n   1 | \n   2 | class App:\n";
        memory.observe_tool_output(ToolObservation::Read { path: Some("src/app.py") }, output);
        let record = &memory.files()[0];
        assert_eq!(record.path, "src/app.py");
        assert_eq!(record.max_line, Some(42));
        assert_eq!(record.lines_read, 2);
        assert_eq!(record.summary, "class App:");
    }

    #[test]
    fn error_output_is_not_a_read() {
        let mut memory = WorkingMemory::new();
        memory.observe_tool_output(ToolObservation::Read { path: Some("x.py") }, "Error: File 'x.py' does not exist");
        memory.observe_tool_output(ToolObservation::Read { path: Some(".env") }, "[BLOCKED] Cannot read '.env'");
        assert!(!memory.was_read("x.py"));
        assert_eq!(memory.stats().files_read, 0);
    }

    #[test]
    fn observes_search_output() {
        let mut memory = WorkingMemory::new();
        let output = "🔍 Search results for 'auth':\n──\na.py:1:auth\na.py:9:auth\nb.py:2:auth\n";
        memory.observe_tool_output(ToolObservation::Search { pattern: "auth" }, output);
        let search = &memory.searches()[0];
        assert_eq!(search.result_count, 3);
        assert_eq!(search.key_files, vec!["a.py", "b.py"]);
    }

    #[test]
    fn summary_lists_citable_files_and_facts() {
        let mut memory = WorkingMemory::new();
        memory.record_file_read("main.py", 10, "", Some(10));
        memory.add_fact("foo is defined in main.py", "main.py:5");
        memory.add_fact("foo is defined in main.py", "main.py:5");
        let summary = memory.to_context_summary(10);
        assert!(summary.contains("- main.py (lines 1-10)"));
        assert!(summary.contains("**CITATION RULE:**"));
        assert!(summary.contains("- foo is defined in main.py [main.py:5]"));
        assert_eq!(memory.facts().len(), 1);
    }

    #[test]
    fn summary_without_reads_says_so() {
        let summary = WorkingMemory::new().to_context_summary(10);
        assert!(summary.contains("### NO FILES READ YET"));
    }

    #[test]
    fn reset_clears_everything() {
        let mut memory = WorkingMemory::new();
        memory.record_file_read("main.py", 1, "", Some(1));
        memory.record_search("x", 0, Vec::new());
        memory.add_fact("f", "main.py:1");
        memory.reset();
        assert_eq!(
            memory.stats(),
            MemoryStats {
                files_read: 0,
                searches: 0,
                facts: 0
            }
        );
        assert!(!memory.was_read("main.py"));
    }
}
