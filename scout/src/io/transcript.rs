//! Per-turn transcripts under `.scout/transcripts/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::grounding::GroundingReport;
use crate::core::types::ToolCall;
use crate::io::config::write_atomic;
use crate::turn::{TurnOutcome, TurnPhase};

#[derive(Debug, Clone, Serialize)]
pub struct TurnTranscript<'a> {
    pub session_id: &'a str,
    pub turn: u32,
    pub question: &'a str,
    pub phase: TurnPhase,
    pub cached: bool,
    pub answer: &'a str,
    pub removed_citations: usize,
    pub trip_reason: Option<&'a str>,
    pub tool_calls: &'a [ToolCall],
    pub report: Option<&'a GroundingReport>,
    pub recorded_at: String,
}

impl<'a> TurnTranscript<'a> {
    pub fn new(session_id: &'a str, turn: u32, question: &'a str, outcome: &'a TurnOutcome) -> Self {
        Self {
            session_id,
            turn,
            question,
            phase: outcome.phase,
            cached: outcome.cached,
            answer: &outcome.answer,
            removed_citations: outcome.removed_citations,
            trip_reason: outcome.trip_reason.as_deref(),
            tool_calls: &outcome.tool_calls,
            report: outcome.report.as_ref(),
            recorded_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Summary row for `scout transcripts`-style listings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TranscriptSummary {
    pub session_id: String,
    pub turn: u32,
    pub question: String,
    pub phase: TurnPhase,
}

pub fn transcript_path(dir: &Path, session_id: &str, turn: u32) -> PathBuf {
    dir.join(session_id).join(format!("turn-{turn:03}.json"))
}

pub fn write_transcript(dir: &Path, transcript: &TurnTranscript<'_>) -> Result<PathBuf> {
    let path = transcript_path(dir, transcript.session_id, transcript.turn);
    let mut buf = serde_json::to_string_pretty(transcript).context("serialize transcript")?;
    buf.push('\n');
    write_atomic(&path, buf.as_bytes())?;
    Ok(path)
}

/// Summaries of every transcript recorded for a session, in turn order.
pub fn list_transcripts(dir: &Path, session_id: &str) -> Result<Vec<TranscriptSummary>> {
    let session_dir = dir.join(session_id);
    if !session_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(&session_dir)
        .with_context(|| format!("read {}", session_dir.display()))?
    {
        let path = entry
            .with_context(|| format!("read {}", session_dir.display()))?
            .path();
        if path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let summary: TranscriptSummary =
            serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
        out.push(summary);
    }
    out.sort_by_key(|summary| summary.turn);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(answer: &str) -> TurnOutcome {
        TurnOutcome {
            answer: answer.to_string(),
            phase: TurnPhase::Done,
            report: None,
            removed_citations: 1,
            tool_calls: Vec::new(),
            trip_reason: None,
            cached: false,
        }
    }

    #[test]
    fn transcript_paths_are_stable() {
        let path = transcript_path(Path::new("/r/.scout/transcripts"), "s-1", 7);
        assert!(path.ends_with("s-1/turn-007.json"));
    }

    #[test]
    fn writes_and_lists_transcripts_in_turn_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let second = outcome("b");
        let first = outcome("a");
        write_transcript(temp.path(), &TurnTranscript::new("s-1", 2, "why?", &second))
            .expect("write");
        let path = write_transcript(temp.path(), &TurnTranscript::new("s-1", 1, "where?", &first))
            .expect("write");

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).expect("read")).expect("json");
        assert_eq!(raw["phase"], "done");
        assert_eq!(raw["removed_citations"], 1);

        let listed = list_transcripts(temp.path(), "s-1").expect("list");
        let questions: Vec<&str> = listed.iter().map(|s| s.question.as_str()).collect();
        assert_eq!(questions, vec!["where?", "why?"]);
        assert!(list_transcripts(temp.path(), "missing").expect("list").is_empty());
    }
}
