//! Case file parsing and validation.
//!
//! Cases are TOML files holding one question and the checks its answer
//! must satisfy. See `eval/cases/` for examples.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;

use scout::core::grounding::VerificationPolicy;

/// A parsed case file containing the question, overrides, and checks.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CaseFile {
    pub case: CaseMeta,
    #[serde(default)]
    pub config: CaseConfig,
    #[serde(default, rename = "check")]
    pub checks: Vec<Check>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaseMeta {
    /// Unique identifier (slug format: `[a-z0-9_-]+`).
    pub id: String,
    /// Free-form grouping used in listings (`overview`, `code_flow`, ...).
    #[serde(default = "default_category")]
    pub category: String,
    pub question: String,
}

fn default_category() -> String {
    "general".to_string()
}

/// Assistant configuration overrides for the case.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct CaseConfig {
    pub max_total_calls: Option<usize>,
    pub verification_policy: Option<VerificationPolicy>,
}

/// Expectation on a single answered question.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Check {
    /// The turn finished without tripping the breaker or failing.
    NotAborted,
    /// At least `count` citations survived verification.
    MinCitations { count: usize },
    /// Some valid citation points into `path`.
    CitesFile { path: String },
    /// `read_file` was called on `path` during the turn.
    ReadsFile { path: String },
    /// Citation precision reached `value`.
    MinPrecision { value: f64 },
    /// The final answer contains `text` (case-insensitive).
    Mentions { text: String },
}

impl CaseFile {
    /// Load and validate a case file from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read case {}", path.display()))?;
        let case: CaseFile =
            toml::from_str(&contents).with_context(|| format!("parse case {}", path.display()))?;
        case.validate()
            .with_context(|| format!("validate case {}", path.display()))?;
        Ok(case)
    }

    #[cfg(test)]
    pub fn parse_str(contents: &str) -> Result<Self> {
        let case: CaseFile = toml::from_str(contents).context("parse case")?;
        case.validate()?;
        Ok(case)
    }

    fn validate(&self) -> Result<()> {
        validate_case_id(&self.case.id)?;
        if self.case.question.trim().is_empty() {
            bail!("case.question must be non-empty");
        }
        if self.case.category.trim().is_empty() {
            bail!("case.category must be non-empty");
        }
        if let Some(max_total_calls) = self.config.max_total_calls
            && max_total_calls == 0
        {
            bail!("config.max_total_calls must be > 0");
        }
        if self.checks.is_empty() {
            bail!("check must be a non-empty array");
        }
        for (index, check) in self.checks.iter().enumerate() {
            check
                .validate()
                .with_context(|| format!("check[{index}] invalid"))?;
        }
        Ok(())
    }
}

impl Check {
    fn validate(&self) -> Result<()> {
        match self {
            Check::NotAborted => {}
            Check::MinCitations { count } => {
                if *count == 0 {
                    bail!("min_citations.count must be > 0");
                }
            }
            Check::CitesFile { path } | Check::ReadsFile { path } => {
                if path.trim().is_empty() {
                    bail!("{}.path must be non-empty", self.kind());
                }
            }
            Check::MinPrecision { value } => {
                if !(0.0..=1.0).contains(value) {
                    bail!("min_precision.value must be within 0.0..=1.0");
                }
            }
            Check::Mentions { text } => {
                if text.trim().is_empty() {
                    bail!("mentions.text must be non-empty");
                }
            }
        }
        Ok(())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Check::NotAborted => "not_aborted",
            Check::MinCitations { .. } => "min_citations",
            Check::CitesFile { .. } => "cites_file",
            Check::ReadsFile { .. } => "reads_file",
            Check::MinPrecision { .. } => "min_precision",
            Check::Mentions { .. } => "mentions",
        }
    }

    /// Stable label used to group pass rates across runs.
    pub fn label(&self) -> String {
        match self {
            Check::NotAborted => self.kind().to_string(),
            Check::MinCitations { count } => format!("min_citations({count})"),
            Check::CitesFile { path } => format!("cites_file({path})"),
            Check::ReadsFile { path } => format!("reads_file({path})"),
            Check::MinPrecision { value } => format!("min_precision({value})"),
            Check::Mentions { text } => format!("mentions({text})"),
        }
    }
}

/// Discover and load all case files from a directory.
///
/// Returns cases sorted by id. Errors if duplicate ids are found.
pub fn discover_cases(dir: &Path) -> Result<Vec<CaseFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut cases = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read cases dir {}", dir.display()))? {
        let entry = entry.context("read case entry")?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            continue;
        }
        cases.push(CaseFile::load(&path)?);
    }
    cases.sort_by(|left, right| left.case.id.cmp(&right.case.id));
    for pair in cases.windows(2) {
        if pair[0].case.id == pair[1].case.id {
            return Err(anyhow!("duplicate case.id {}", pair[0].case.id));
        }
    }
    Ok(cases)
}

pub fn validate_case_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        bail!("case.id must be non-empty");
    }
    if id.contains('/') || id.contains('\\') {
        bail!("case.id must not contain path separators");
    }
    if id.contains("..") {
        bail!("case.id must not contain '..'");
    }
    if !id
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')
    {
        bail!("case.id must use [a-z0-9_-] only");
    }
    Ok(())
}
