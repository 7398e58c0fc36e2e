//! Check evaluation and metric extraction.
//!
//! Judges one answered question against the case's checks. Everything here
//! works from the recorded [`TurnOutcome`]; nothing re-runs tools.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use scout::core::tool_text::{normalize_path, same_file};
use scout::turn::{TurnOutcome, TurnPhase};

use crate::case::Check;

/// Grounding and exploration metrics for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub citations: usize,
    pub valid_citations: usize,
    pub removed_citations: usize,
    pub claims: usize,
    pub grounded_claims: usize,
    pub tool_calls: usize,
    pub files_read: usize,
}

impl RunMetrics {
    pub fn from_outcome(outcome: &TurnOutcome) -> Self {
        let mut metrics = Self {
            removed_citations: outcome.removed_citations,
            tool_calls: outcome.tool_calls.len(),
            files_read: files_read(outcome).len(),
            ..Self::default()
        };
        if let Some(report) = &outcome.report {
            metrics.precision = report.precision;
            metrics.recall = report.recall;
            metrics.f1 = report.f1;
            metrics.citations = report.citations.len();
            metrics.valid_citations = report.valid_count();
            metrics.claims = report.claims.len();
            metrics.grounded_claims = report.grounded_count();
        }
        metrics
    }
}

/// Collected check outcomes for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    pub checks: Vec<CheckOutcome>,
}

impl Judgment {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|check| check.passed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub label: String,
    pub passed: bool,
    pub detail: String,
}

/// Run every check against a finished turn.
pub fn run_checks(checks: &[Check], outcome: &TurnOutcome) -> Judgment {
    let metrics = RunMetrics::from_outcome(outcome);
    let read = files_read(outcome);
    let checks = checks
        .iter()
        .map(|check| {
            let (passed, detail) = judge(check, outcome, &metrics, &read);
            CheckOutcome {
                label: check.label(),
                passed,
                detail,
            }
        })
        .collect();
    Judgment { checks }
}

fn judge(
    check: &Check,
    outcome: &TurnOutcome,
    metrics: &RunMetrics,
    read: &BTreeSet<String>,
) -> (bool, String) {
    match check {
        Check::NotAborted => (
            outcome.phase == TurnPhase::Done,
            match &outcome.trip_reason {
                Some(reason) => format!("phase={:?} trip={reason}", outcome.phase),
                None => format!("phase={:?}", outcome.phase),
            },
        ),
        Check::MinCitations { count } => (
            metrics.valid_citations >= *count,
            format!("valid_citations={}", metrics.valid_citations),
        ),
        Check::CitesFile { path } => {
            let wanted = normalize(path);
            let cited: BTreeSet<String> = outcome
                .report
                .iter()
                .flat_map(|report| report.citations.iter())
                .filter(|verdict| verdict.valid)
                .map(|verdict| normalize(&verdict.citation.file))
                .collect();
            let passed = cited.iter().any(|file| same_file(file, &wanted));
            (passed, format!("cited={}", join(&cited)))
        }
        Check::ReadsFile { path } => {
            let wanted = normalize(path);
            let passed = read.iter().any(|file| same_file(file, &wanted));
            (passed, format!("read={}", join(read)))
        }
        Check::MinPrecision { value } => (
            metrics.citations > 0 && metrics.precision >= *value,
            format!(
                "precision={:.3} citations={}",
                metrics.precision, metrics.citations
            ),
        ),
        Check::Mentions { text } => {
            let passed = outcome
                .answer
                .to_lowercase()
                .contains(&text.to_lowercase());
            (passed, format!("answer_chars={}", outcome.answer.chars().count()))
        }
    }
}

/// Distinct paths passed to `read_file` during the turn.
pub fn files_read(outcome: &TurnOutcome) -> BTreeSet<String> {
    outcome
        .tool_calls
        .iter()
        .filter(|call| call.name == "read_file")
        .filter_map(|call| call.args.get("file_path").and_then(Value::as_str))
        .map(normalize)
        .collect()
}

pub fn write_judgment(path: &Path, judgment: &Judgment) -> Result<()> {
    let contents = serde_json::to_string_pretty(judgment).context("serialize checks")?;
    fs::write(path, format!("{contents}\n"))
        .with_context(|| format!("write checks {}", path.display()))?;
    Ok(())
}

fn normalize(path: &str) -> String {
    normalize_path(path).replace('\\', "/")
}

fn join(paths: &BTreeSet<String>) -> String {
    if paths.is_empty() {
        return "-".to_string();
    }
    paths.iter().cloned().collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout::core::grounding::{VerificationPolicy, verify_answer};
    use scout::core::types::ToolCall;
    use scout::test_support::numbered_read_output;
    use serde_json::json;

    fn outcome(answer: &str, phase: TurnPhase) -> TurnOutcome {
        let output = numbered_read_output("src/auth.py", &["import jwt", "", "def login(user):", "    return encode(user)"]);
        let report = verify_answer(answer, &[output.as_str()], VerificationPolicy::Strict);
        TurnOutcome {
            answer: answer.to_string(),
            phase,
            report: Some(report),
            removed_citations: 0,
            tool_calls: vec![
                ToolCall {
                    name: "read_file".to_string(),
                    args: json!({"file_path": "./src/auth.py"}),
                    output,
                },
                ToolCall {
                    name: "search_code".to_string(),
                    args: json!({"pattern": "login"}),
                    output: "src/auth.py:3: def login(user):".to_string(),
                },
            ],
            trip_reason: None,
            cached: false,
        }
    }

    #[test]
    fn judges_a_grounded_answer() {
        let outcome = outcome(
            "The login function returns an encoded token at src/auth.py:4.",
            TurnPhase::Done,
        );
        let checks = vec![
            Check::NotAborted,
            Check::MinCitations { count: 1 },
            Check::CitesFile {
                path: "auth.py".to_string(),
            },
            Check::ReadsFile {
                path: "src/auth.py".to_string(),
            },
            Check::MinPrecision { value: 1.0 },
            Check::Mentions {
                text: "TOKEN".to_string(),
            },
        ];
        let judgment = run_checks(&checks, &outcome);
        assert!(judgment.all_passed(), "{judgment:?}");

        let metrics = RunMetrics::from_outcome(&outcome);
        assert_eq!(metrics.tool_calls, 2);
        assert_eq!(metrics.files_read, 1);
        assert_eq!(metrics.valid_citations, 1);
    }

    #[test]
    fn flags_invalid_citations_and_aborts() {
        let mut outcome = outcome("See src/auth.py:40 and src/db.py:2.", TurnPhase::Aborted);
        outcome.trip_reason = Some("too many calls".to_string());
        let checks = vec![
            Check::NotAborted,
            Check::MinCitations { count: 1 },
            Check::CitesFile {
                path: "src/db.py".to_string(),
            },
            Check::MinPrecision { value: 0.5 },
        ];
        let judgment = run_checks(&checks, &outcome);
        assert!(judgment.checks.iter().all(|check| !check.passed), "{judgment:?}");
        assert_eq!(judgment.checks[0].detail, "phase=Aborted trip=too many calls");
    }

    #[test]
    fn precision_needs_at_least_one_citation() {
        let outcome = outcome("It handles login.", TurnPhase::Done);
        let judgment = run_checks(&[Check::MinPrecision { value: 0.0 }], &outcome);
        assert!(!judgment.all_passed());
    }
}
