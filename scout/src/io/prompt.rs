//! Embedded prompt templates rendered with minijinja.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::{Regex, RegexBuilder};

use crate::core::memory::WorkingMemory;
use crate::io::engine::ToolSchema;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const DEEP_DIVE_TEMPLATE: &str = include_str!("prompts/deep_dive.md");
const CODE_FLOW_TEMPLATE: &str = include_str!("prompts/code_flow.md");
const OVERVIEW_TEMPLATE: &str = include_str!("prompts/overview.md");
const CITATION_REMINDER_TEMPLATE: &str = include_str!("prompts/citation_reminder.md");

static CODE_FLOW_RE: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(
        r"\b(flow|trace|traced|tracing|call\s+chain|what\s+happens\s+when|execution\s+path|lifecycle|sequence)\b|\bhow\s+does\b.*\bwork",
    )
    .case_insensitive(true)
    .build()
    .expect("code flow pattern should compile")
});

/// Questions about control flow get the tracing workflow.
pub fn is_code_flow_question(question: &str) -> bool {
    CODE_FLOW_RE.is_match(question)
}

pub struct PromptLibrary {
    env: Environment<'static>,
}

impl PromptLibrary {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        for (name, source) in [
            ("system", SYSTEM_TEMPLATE),
            ("deep_dive", DEEP_DIVE_TEMPLATE),
            ("code_flow", CODE_FLOW_TEMPLATE),
            ("overview", OVERVIEW_TEMPLATE),
            ("citation_reminder", CITATION_REMINDER_TEMPLATE),
        ] {
            env.add_template(name, source)
                .with_context(|| format!("load prompt template {name}"))?;
        }
        Ok(Self { env })
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let template = self.env.get_template(name)?;
        template
            .render(ctx)
            .with_context(|| format!("render prompt {name}"))
    }

    pub fn system(&self, repo_path: &Path, tools: &[ToolSchema]) -> Result<String> {
        self.render(
            "system",
            context! {
                repo_path => repo_path.display().to_string(),
                tools => tools,
            },
        )
    }

    /// Wrap a user question in the deep-dive or code-flow workflow.
    pub fn question(&self, question: &str) -> Result<String> {
        let name = if is_code_flow_question(question) {
            "code_flow"
        } else {
            "deep_dive"
        };
        self.render(name, context! { question => question.trim() })
    }

    pub fn overview(&self) -> Result<String> {
        self.render("overview", context! {})
    }

    /// Append what the engine may cite: the working-memory briefing once a
    /// file has been read, the citation reminder before that.
    pub fn augment(&self, prompt: &str, memory: &WorkingMemory, max_facts: usize) -> Result<String> {
        let suffix = if memory.files().is_empty() {
            self.render("citation_reminder", context! {})?
        } else {
            memory.to_context_summary(max_facts)
        };
        Ok(format!("{prompt}\n\n{}", suffix.trim_end()))
    }
}
