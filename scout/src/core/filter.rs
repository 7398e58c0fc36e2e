//! Strip citations that failed verification from an answer.
//!
//! Each invalid `file:line` (in any recognized syntax) is rewritten to the bare
//! file name so the prose still reads naturally. Valid citations are left
//! alone, and running the filter on its own output changes nothing.

use regex::{Captures, Regex};
use tracing::warn;

use crate::core::citations::{COLON_RE, HYPHEN_RE, parse_line};
use crate::core::grounding::{GroundingReport, VerificationPolicy, verify_answer};
use crate::core::types::Citation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOutcome {
    pub text: String,
    pub removed: usize,
}

/// Verify `text` against `outputs` and strip every invalid citation.
pub fn filter_ungrounded_citations(
    text: &str,
    outputs: &[&str],
    policy: VerificationPolicy,
    add_note: bool,
) -> FilterOutcome {
    let report = verify_answer(text, outputs, policy);
    filter_reported(text, &report, add_note)
}

/// Strip the citations an existing report marked invalid.
pub fn filter_reported(text: &str, report: &GroundingReport, add_note: bool) -> FilterOutcome {
    let invalid: Vec<Citation> = report
        .invalid_citations()
        .map(|verdict| {
            warn!(
                citation = %verdict.citation,
                reason = %verdict.reason,
                "removing ungrounded citation"
            );
            verdict.citation.clone()
        })
        .collect();
    strip_citations(text, &invalid, add_note)
}

/// Rewrite every occurrence of the given citations to the bare file name.
///
/// Matching reuses the extraction patterns, so exactly the spans the
/// extractor would report are rewritten.
pub fn strip_citations(text: &str, invalid: &[Citation], add_note: bool) -> FilterOutcome {
    let mut out = text.to_string();
    if !invalid.is_empty() {
        out = rewrite(&HYPHEN_RE, &out, invalid, |file| format!("`{file}`"));
        out = rewrite(&COLON_RE, &out, invalid, str::to_string);
    }

    let removed = invalid.len();
    if add_note && removed > 0 {
        out.push_str(&removal_note(removed));
    }
    FilterOutcome { text: out, removed }
}

fn rewrite(re: &Regex, text: &str, invalid: &[Citation], bare: impl Fn(&str) -> String) -> String {
    re.replace_all(text, |caps: &Captures<'_>| {
        let whole = &caps[0];
        let file = &caps["file"];
        match parse_line(&caps["line"]) {
            Some(line) if invalid.contains(&Citation::new(file, line)) => bare(file),
            _ => whole.to_string(),
        }
    })
    .into_owned()
}

fn removal_note(removed: usize) -> String {
    let noun = if removed == 1 { "citation" } else { "citations" };
    format!(
        "\n\n_Note: {removed} {noun} removed because the cited lines were not seen \
         in files read during this session._"
    )
}
