//! Result capture and persistence.
//!
//! Each run gets its own directory holding `meta.json` (identity, timings,
//! outcome, metrics), `checks.json`, and `transcript.json`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use scout::io::git::Git;
use scout::io::transcript::TurnTranscript;
use scout::turn::TurnOutcome;

use crate::judge::{Judgment, RunMetrics, write_judgment};
use crate::outcome::Outcome;

/// Input for capturing results from a completed run.
#[derive(Debug)]
pub struct CaptureInput<'a> {
    pub case_id: &'a str,
    pub category: &'a str,
    pub case_path: &'a Path,
    pub eval_run_id: &'a str,
    pub repo: &'a Path,
    pub model: &'a str,
    pub session_id: &'a str,
    pub question: &'a str,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// `None` when the assistant failed before producing an outcome.
    pub turn: Option<&'a TurnOutcome>,
    pub error: Option<String>,
    pub judgment: &'a Judgment,
    pub outcome: Outcome,
}

/// Metadata for an eval run, persisted to `meta.json`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EvalMeta {
    pub case_id: String,
    pub category: String,
    pub eval_run_id: String,
    /// SHA-256 hash of the case file for reproducibility tracking.
    pub case_hash: String,
    /// HEAD of the explored repository, when it is a git checkout.
    pub repo_git_sha: Option<String>,
    pub repo: String,
    pub model: String,
    pub outcome: Outcome,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
    pub metrics: Option<RunMetrics>,
    pub error: Option<String>,
    /// Non-fatal errors encountered during capture.
    pub errors: Vec<String>,
}

/// Write `meta.json`, `checks.json`, and (when a turn finished) `transcript.json`.
#[instrument(skip_all, fields(case_id = %input.case_id, eval_run_id = %input.eval_run_id))]
pub fn capture_results(base_dir: &Path, input: &CaptureInput<'_>) -> Result<PathBuf> {
    let results_dir = results_dir(base_dir, input.case_id, input.eval_run_id);
    fs::create_dir_all(&results_dir)
        .with_context(|| format!("create results dir {}", results_dir.display()))?;

    let mut errors = Vec::new();

    let case_hash = match file_sha256(input.case_path) {
        Ok(hash) => hash,
        Err(err) => {
            errors.push(format!("case hash: {err}"));
            String::new()
        }
    };

    let repo_git_sha = Git::new(input.repo).head_sha();

    if let Some(turn) = input.turn {
        let transcript = TurnTranscript::new(input.session_id, 1, input.question, turn);
        if let Err(err) = write_json(&results_dir.join("transcript.json"), &transcript) {
            errors.push(format!("transcript: {err:#}"));
        }
    }
    write_judgment(&results_dir.join("checks.json"), input.judgment)?;

    if !errors.is_empty() {
        warn!(errors = ?errors, "artifact capture had errors");
    }

    let duration = input.finished_at - input.started_at;
    let meta = EvalMeta {
        case_id: input.case_id.to_string(),
        category: input.category.to_string(),
        eval_run_id: input.eval_run_id.to_string(),
        case_hash,
        repo_git_sha,
        repo: input.repo.display().to_string(),
        model: input.model.to_string(),
        outcome: input.outcome,
        start_time: input.started_at.to_rfc3339(),
        end_time: input.finished_at.to_rfc3339(),
        duration_secs: duration.num_milliseconds() as f64 / 1000.0,
        metrics: input.turn.map(RunMetrics::from_outcome),
        error: input.error.clone(),
        errors,
    };

    write_json(&results_dir.join("meta.json"), &meta)?;
    debug!(results_dir = %results_dir.display(), "results captured");
    Ok(results_dir)
}

pub fn read_meta(path: &Path) -> Result<EvalMeta> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

pub fn results_dir(base_dir: &Path, case_id: &str, eval_run_id: &str) -> PathBuf {
    base_dir.join(case_id).join(eval_run_id)
}

fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    let contents = serde_json::to_string_pretty(value).context("serialize json")?;
    fs::write(path, format!("{contents}\n"))
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn file_sha256(path: &Path) -> Result<String> {
    let contents = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(contents);
    let digest = hasher.finalize();
    Ok(hex::encode(digest))
}
