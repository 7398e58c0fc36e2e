//! Tool-order advice.
//!
//! Some tools work best after others: reading a file blind, before any search
//! or listing, usually means guessing paths. The router warns once per rule
//! per session and never blocks a call.

use std::collections::BTreeSet;

use tracing::warn;

struct RoutingRule {
    tool: &'static str,
    prerequisites: &'static [&'static str],
    min_prerequisites: usize,
    warning: &'static str,
}

const RULES: &[RoutingRule] = &[RoutingRule {
    tool: "read_file",
    prerequisites: &[
        "search_code",
        "find_files_by_pattern",
        "list_directory_structure",
    ],
    min_prerequisites: 1,
    warning: "Consider searching for relevant files before reading directly.",
}];

#[derive(Debug, Clone, Default)]
pub struct ToolRouter {
    history: Vec<String>,
    warned: BTreeSet<&'static str>,
    warnings: Vec<&'static str>,
}

impl ToolRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check `tool` against the rules, then record it. Returns a warning the
    /// first time a rule is broken.
    pub fn route(&mut self, tool: &str) -> Option<&'static str> {
        let warning = self.check(tool);
        self.history.push(tool.to_string());
        warning
    }

    fn check(&mut self, tool: &str) -> Option<&'static str> {
        let rule = RULES.iter().find(|rule| rule.tool == tool)?;
        let seen = self
            .history
            .iter()
            .filter(|called| rule.prerequisites.iter().any(|tool| *tool == called.as_str()))
            .count();
        if seen >= rule.min_prerequisites || !self.warned.insert(rule.tool) {
            return None;
        }
        warn!(tool, advice = rule.warning, "tool routing");
        self.warnings.push(rule.warning);
        Some(rule.warning)
    }

    /// Suggested next step from the last call.
    pub fn recommended_next(&self) -> Option<&'static str> {
        match self.history.last().map(String::as_str) {
            None => Some("list_directory_structure"),
            Some("list_directory_structure") => Some("search_code"),
            Some("search_code" | "find_files_by_pattern") => Some("read_file"),
            Some(_) => None,
        }
    }

    pub fn warnings(&self) -> &[&'static str] {
        &self.warnings
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
