//! Heuristic claim extraction.
//!
//! A claim is a sentence that asserts something checkable about the codebase.
//! Sentences are typed by keyword family and dropped when they read as a
//! question, a hedge, narration of the assistant's own process, or advice.
//! These are approximations; keep them pure so their hit rates can be measured
//! in isolation.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

use crate::core::citations::extract_citations;
use crate::core::types::{Claim, ClaimKind};

pub const MIN_SENTENCE_CHARS: usize = 10;

/// Keyword families, tested in order; the first hit decides the kind.
struct ClaimPatterns {
    kinds: Vec<(ClaimKind, Regex)>,
    hedging: Regex,
    meta: Regex,
    advisory: Regex,
    list_marker: Regex,
}

static PATTERNS: LazyLock<ClaimPatterns> = LazyLock::new(|| ClaimPatterns {
    kinds: vec![
        (
            ClaimKind::Location,
            ci(r"\b(?:defined|located|found|declared|implemented|stored|lives?)\s+(?:in|at|inside|within)\b"),
        ),
        (
            ClaimKind::Structure,
            ci(r"\b(?:uses?|follows?|implements?|is\s+built\s+(?:on|around))\s+(?:an?\s+|the\s+)?(?:[\w-]+\s+){0,3}(?:pattern|architecture|design)\b"),
        ),
        (
            ClaimKind::Functionality,
            ci(r"\b(?:handles?|returns?|implements?|processes|validates?|creates?|initiali[sz]es?|calls?|parses?|manages?|exports?|registers?)\b"),
        ),
        (
            ClaimKind::Dependency,
            ci(r"\b(?:uses?|imports?|depends\s+on|requires?|relies\s+on)\b"),
        ),
    ],
    hedging: ci(r"\b(?:might|may|could|probably|possibly|perhaps|seems?|appears?|likely|unclear|i\s+think|i\s+believe|i\s+guess|not\s+sure)\b"),
    meta: ci(r"^(?:i'll|i\s+will|i'm\s+going\s+to|i\s+am\s+going\s+to|let\s+me|let's|now\s+i|next,?\s+i|first,?\s+i|i\s+need\s+to|i\s+should)\b"),
    advisory: ci(r"^(?:you\s+should|you\s+can|you\s+could|you\s+may|you\s+might|consider|note:|tip:|try\b|make\s+sure|be\s+sure)"),
    list_marker: ci(r"^\s*(?:[-*+•]|\d+[.)])\s+"),
});

fn ci(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .expect("claim pattern should compile")
}

/// Split text into sentences. Lines are split first so list items stay
/// separate, then on `.`, `!`, or `?` followed by whitespace. Fenced code
/// blocks, headings, and table rows are skipped.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut in_fence = false;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence || trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('|') {
            continue;
        }
        let line = PATTERNS.list_marker.replace(trimmed, "");
        let mut current = String::new();
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            current.push(c);
            let boundary = matches!(c, '.' | '!' | '?')
                && chars.peek().is_some_and(|next| next.is_whitespace());
            if boundary {
                push_sentence(&mut sentences, &current);
                current.clear();
            }
        }
        push_sentence(&mut sentences, &current);
    }
    sentences
}

fn push_sentence(out: &mut Vec<String>, raw: &str) {
    let sentence = raw.trim();
    if !sentence.is_empty() {
        out.push(sentence.to_string());
    }
}

/// Kind of claim a sentence makes, or `None` if it is filtered out.
pub fn classify_sentence(sentence: &str) -> Option<ClaimKind> {
    let sentence = sentence.trim();
    if sentence.chars().count() < MIN_SENTENCE_CHARS || is_filtered(sentence) {
        return None;
    }
    PATTERNS
        .kinds
        .iter()
        .find(|(_, re)| re.is_match(sentence))
        .map(|(kind, _)| *kind)
}

fn is_filtered(sentence: &str) -> bool {
    let stripped = sentence.trim_start_matches(['*', '_', '>', ' ']);
    sentence.ends_with('?')
        || PATTERNS.hedging.is_match(sentence)
        || PATTERNS.meta.is_match(stripped)
        || PATTERNS.advisory.is_match(stripped)
}

/// Extract typed claims, each carrying the first citation in its sentence.
pub fn extract_claims(text: &str) -> Vec<Claim> {
    split_sentences(text)
        .into_iter()
        .filter_map(|sentence| {
            let kind = classify_sentence(&sentence)?;
            let citation = extract_citations(&sentence).into_iter().next();
            Some(Claim {
                text: sentence,
                kind,
                citation,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Citation;

    #[test]
    fn splits_on_terminators_and_lines() {
        let text = "First one here. Second one! Third?\n- a list item\n1. numbered item";
        assert_eq!(
            split_sentences(text),
            vec![
                "First one here.",
                "Second one!",
                "Third?",
                "a list item",
                "numbered item"
            ]
        );
    }

    #[test]
    fn does_not_split_inside_citations() {
        let sentences = split_sentences("The entry point is in main.py:5. It starts the app.");
        assert_eq!(
            sentences,
            vec!["The entry point is in main.py:5.", "It starts the app."]
        );
    }

    #[test]
    fn skips_code_fences_and_headings() {
        let text = "## Overview\n```python\ndef handles(): return x\n```\nThe parser handles tokens.";
        assert_eq!(split_sentences(text), vec!["The parser handles tokens."]);
    }

    #[test]
    fn classifies_each_family() {
        assert_eq!(
            classify_sentence("The router is defined in app.py:10."),
            Some(ClaimKind::Location)
        );
        assert_eq!(
            classify_sentence("The login view handles password resets."),
            Some(ClaimKind::Functionality)
        );
        assert_eq!(
            classify_sentence("The project uses a layered MVC architecture."),
            Some(ClaimKind::Structure)
        );
        assert_eq!(
            classify_sentence("The server depends on tokio for IO."),
            Some(ClaimKind::Dependency)
        );
    }

    #[test]
    fn filters_questions_hedges_meta_and_advice() {
        assert_eq!(classify_sentence("Where is the config defined in?"), None);
        assert_eq!(classify_sentence("This probably handles retries."), None);
        assert_eq!(classify_sentence("It seems to return a list."), None);
        assert_eq!(classify_sentence("Let me check where it is defined in code."), None);
        assert_eq!(classify_sentence("I'll look at what the parser returns."), None);
        assert_eq!(classify_sentence("You should check what auth.py handles."), None);
        assert_eq!(classify_sentence("Consider what the handler returns."), None);
    }

    #[test]
    fn enforces_minimum_length() {
        assert_eq!(classify_sentence("It calls."), None);
        assert_eq!(classify_sentence("It calls x."), Some(ClaimKind::Functionality));
    }

    #[test]
    fn sentences_without_keywords_are_not_claims() {
        assert_eq!(classify_sentence("This is a nice repository overall."), None);
    }

    #[test]
    fn claims_carry_first_citation() {
        let claims = extract_claims(
            "The `foo` function is defined in main.py:5 and utils.py:9. The app is nice.",
        );
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].kind, ClaimKind::Location);
        assert_eq!(claims[0].citation, Some(Citation::new("main.py", 5)));
    }

    #[test]
    fn uncited_claims_have_no_citation() {
        let claims = extract_claims("The service validates every request body.");
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].citation, None);
    }
}
