//! Grounding verification: do citations and claims rest on tool output?
//!
//! A citation is checked against read-file outputs recorded in the session:
//! the output's header must name the cited file and, under the strict policy,
//! a `NNN | content` row for the cited line must be present. Claims are then
//! scored by vocabulary overlap with either the cited line or, for uncited
//! claims, the best-matching tool output.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::citations::extract_citations;
use crate::core::claims::extract_claims;
use crate::core::tool_text::{parse_read_header, row_content, same_file};
use crate::core::types::{Citation, Claim};

pub const CITED_CLAIM_THRESHOLD: f64 = 0.3;
pub const UNCITED_CLAIM_THRESHOLD: f64 = 0.4;
const EMPTY_CLAIM_SCORE: f64 = 0.5;
const MIN_WORD_CHARS: usize = 4;

const STOPWORDS: &[&str] = &[
    "this", "that", "with", "from", "have", "has", "which", "what", "when", "where", "there",
    "their", "these", "those", "into", "also", "been", "were", "will", "would", "should", "could",
    "does", "then", "than", "them", "they", "each", "more", "most", "some", "such", "only",
    "other", "about", "after", "before", "over", "under", "here", "very", "just", "your",
];

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z_][a-z0-9_]*").expect("word regex should compile"));

/// How to treat a cited line that is absent from the visible read output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationPolicy {
    /// The cited row must appear in a read output of the file.
    #[default]
    Strict,
    /// A read of the file suffices as long as the line is within its length.
    Soft,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CitationVerdict {
    pub citation: Citation,
    pub valid: bool,
    pub file_read: bool,
    pub line_found: bool,
    pub reason: String,
    /// Content of the cited row, when it was visible.
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimGrounding {
    pub claim: Claim,
    pub grounded: bool,
    pub relevance: f64,
    pub citation_valid: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroundingReport {
    pub citations: Vec<CitationVerdict>,
    pub claims: Vec<ClaimGrounding>,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl GroundingReport {
    pub fn invalid_citations(&self) -> impl Iterator<Item = &CitationVerdict> {
        self.citations.iter().filter(|verdict| !verdict.valid)
    }

    pub fn valid_count(&self) -> usize {
        self.citations.iter().filter(|verdict| verdict.valid).count()
    }

    pub fn grounded_count(&self) -> usize {
        self.claims.iter().filter(|claim| claim.grounded).count()
    }
}

/// Check one citation against the recorded tool outputs.
pub fn verify_citation<'a>(
    citation: &Citation,
    outputs: impl IntoIterator<Item = &'a str>,
    policy: VerificationPolicy,
) -> CitationVerdict {
    let mut file_read = false;
    let mut total_lines: Option<u32> = None;
    for output in outputs {
        let Some(header) = parse_read_header(output) else {
            continue;
        };
        if !same_file(header.name, &citation.file) {
            continue;
        }
        file_read = true;
        if let Some(total) = header.total_lines {
            total_lines = Some(total_lines.map_or(total, |seen| seen.max(total)));
        }
        if let Some(content) = row_content(output, citation.line) {
            return CitationVerdict {
                citation: citation.clone(),
                valid: true,
                file_read: true,
                line_found: true,
                reason: format!("line {} found in read of {}", citation.line, citation.file),
                content: Some(content.to_string()),
            };
        }
    }

    let (valid, reason) = if !file_read {
        (false, format!("file not read: {}", citation.file))
    } else if let Some(total) = total_lines.filter(|total| citation.line > *total) {
        (
            false,
            format!(
                "line {} not found: {} has only {total} lines",
                citation.line, citation.file
            ),
        )
    } else {
        match policy {
            VerificationPolicy::Strict => (
                false,
                format!(
                    "line {} not found in read output of {}",
                    citation.line, citation.file
                ),
            ),
            VerificationPolicy::Soft => (
                true,
                format!(
                    "file read; line {} not in visible output of {}",
                    citation.line, citation.file
                ),
            ),
        }
    };
    CitationVerdict {
        citation: citation.clone(),
        valid,
        file_read,
        line_found: false,
        reason,
        content: None,
    }
}

/// Lowercased words of at least four characters, minus stopwords.
pub fn significant_words(text: &str) -> HashSet<String> {
    let lower = text.to_lowercase();
    WORD_RE
        .find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|word| word.len() >= MIN_WORD_CHARS && !STOPWORDS.contains(word))
        .map(str::to_string)
        .collect()
}

/// Share of the claim's significant words that also appear in `source`.
pub fn compute_relevance(claim: &str, source: &str) -> f64 {
    let claim_words = significant_words(claim);
    if claim_words.is_empty() {
        return EMPTY_CLAIM_SCORE;
    }
    let source_words = significant_words(source);
    let shared = claim_words.intersection(&source_words).count();
    (shared as f64 / claim_words.len() as f64).min(1.0)
}

/// Ground each claim. `verdicts` must cover every claim citation.
pub fn ground_claims(
    claims: Vec<Claim>,
    verdicts: &[CitationVerdict],
    outputs: &[&str],
) -> Vec<ClaimGrounding> {
    claims
        .into_iter()
        .map(|claim| match claim.citation.clone() {
            Some(citation) => {
                let verdict = verdicts.iter().find(|v| v.citation == citation);
                let valid = verdict.is_some_and(|v| v.valid);
                let relevance = match verdict.and_then(|v| v.content.as_deref()) {
                    // The cited path itself is not vocabulary.
                    Some(content) => {
                        compute_relevance(&claim.text.replace(&citation.file, " "), content)
                    }
                    // Soft-valid citation without visible content.
                    None if valid => 1.0,
                    None => 0.0,
                };
                ClaimGrounding {
                    grounded: valid && relevance >= CITED_CLAIM_THRESHOLD,
                    relevance,
                    citation_valid: Some(valid),
                    claim,
                }
            }
            None => {
                let relevance = outputs
                    .iter()
                    .map(|output| compute_relevance(&claim.text, output))
                    .fold(0.0, f64::max);
                ClaimGrounding {
                    grounded: relevance >= UNCITED_CLAIM_THRESHOLD,
                    relevance,
                    citation_valid: None,
                    claim,
                }
            }
        })
        .collect()
}

/// Precision, recall, and F1 from raw counts.
pub fn metrics(valid: usize, total_citations: usize, grounded: usize, total_claims: usize) -> (f64, f64, f64) {
    let precision = ratio(valid, total_citations);
    let recall = ratio(grounded, total_claims);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    (precision, recall, f1)
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// Verify every citation and claim in `answer`.
pub fn verify_answer(answer: &str, outputs: &[&str], policy: VerificationPolicy) -> GroundingReport {
    let citations: Vec<CitationVerdict> = extract_citations(answer)
        .iter()
        .map(|citation| verify_citation(citation, outputs.iter().copied(), policy))
        .collect();
    let claims = ground_claims(extract_claims(answer), &citations, outputs);

    let valid = citations.iter().filter(|v| v.valid).count();
    let grounded = claims.iter().filter(|c| c.grounded).count();
    let (precision, recall, f1) = metrics(valid, citations.len(), grounded, claims.len());
    GroundingReport {
        citations,
        claims,
        precision,
        recall,
        f1,
    }
}
