//! Case execution orchestration.
//!
//! Builds an assistant for the target repository, asks the case question
//! once, judges the outcome, and captures results.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use scout::assistant::Assistant;
use scout::io::config::ScoutConfig;
use scout::io::engine::ReasoningEngine;

use crate::case::CaseFile;
use crate::config::apply_case_config;
use crate::judge::{Judgment, run_checks};
use crate::outcome::{Outcome, classify_outcome};
use crate::results::{CaptureInput, capture_results};

/// Result of running a single case.
#[derive(Debug)]
pub struct RunOutcome {
    /// Unique identifier for this eval run.
    pub eval_run_id: String,
    /// Path to the results directory.
    pub results_dir: PathBuf,
    /// Classified outcome.
    pub outcome: Outcome,
}

/// Where a case file lives and where its results go.
#[derive(Debug, Clone, Copy)]
pub struct CaseTarget<'a> {
    pub case_path: &'a Path,
    pub case: &'a CaseFile,
    pub repo: &'a Path,
    pub results_base: &'a Path,
    /// Shared by every run of one `scout-eval run` invocation.
    pub batch: &'a str,
}

/// Batch identifier stamped at the start of an invocation.
pub fn batch_id() -> String {
    format!("eval-{}", Utc::now().format("%Y%m%d_%H%M%S"))
}

pub fn eval_run_id(batch: &str, run_number: u32) -> String {
    format!("{batch}-{run_number:02}")
}

/// The batch a run id belongs to.
pub fn batch_of(eval_run_id: &str) -> &str {
    eval_run_id
        .rsplit_once('-')
        .map_or(eval_run_id, |(batch, _)| batch)
}

/// Ask the case question once with a fresh session and record the result.
#[instrument(skip_all, fields(case_id = %target.case.case.id, run_number = run_number))]
pub fn run_case<E: ReasoningEngine>(
    target: CaseTarget<'_>,
    base_cfg: ScoutConfig,
    engine: E,
    run_number: u32,
) -> Result<RunOutcome> {
    let case = target.case;
    info!("case run started");

    let cfg = apply_case_config(base_cfg, &case.config).context("apply case config")?;
    let model = engine.model_id().to_string();
    let mut assistant = Assistant::new(target.repo, cfg, engine).context("create assistant")?;
    let session_id = assistant.session().id().to_string();

    let started_at = Utc::now();
    let eval_run_id = eval_run_id(target.batch, run_number);
    debug!(eval_run_id = %eval_run_id, "asking case question");
    let (turn, error) = match assistant.ask(&case.case.question, false) {
        Ok(turn) => (Some(turn), None),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "assistant failed");
            (None, Some(format!("{err:#}")))
        }
    };
    let finished_at = Utc::now();

    let judgment = turn
        .as_ref()
        .map(|turn| run_checks(&case.checks, turn))
        .unwrap_or_else(Judgment::default);
    let outcome = classify_outcome(turn.as_ref().map(|turn| turn.phase), &judgment);

    let capture = CaptureInput {
        case_id: &case.case.id,
        category: &case.case.category,
        case_path: target.case_path,
        eval_run_id: &eval_run_id,
        repo: assistant.repo_root(),
        model: &model,
        session_id: &session_id,
        question: &case.case.question,
        started_at,
        finished_at,
        turn: turn.as_ref(),
        error,
        judgment: &judgment,
        outcome,
    };
    let results_dir = capture_results(target.results_base, &capture).context("capture results")?;

    info!(outcome = ?outcome, results_dir = %results_dir.display(), "case run complete");

    Ok(RunOutcome {
        eval_run_id,
        results_dir,
        outcome,
    })
}
