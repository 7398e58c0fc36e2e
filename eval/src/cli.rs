//! CLI command implementations.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use scout::io::config::{ScoutPaths, load_config};
use scout::io::engine::HttpEngine;

use crate::case::{CaseFile, discover_cases, validate_case_id};
use crate::category::{
    PROBLEM_PASS_RATE, aggregate_by_category, category_regressions, problem_categories,
};
use crate::report::aggregate;
use crate::run::{CaseTarget, batch_id, run_case};

/// Layout of the eval tree: `<root>/eval/cases` and `<root>/eval/results`.
#[derive(Debug, Clone)]
pub struct EvalDirs {
    pub cases: PathBuf,
    pub results: PathBuf,
}

impl EvalDirs {
    pub fn new(root: &Path) -> Self {
        let eval = root.join("eval");
        Self {
            cases: eval.join("cases"),
            results: eval.join("results"),
        }
    }

    fn case_path(&self, case_id: &str) -> Result<PathBuf> {
        validate_case_id(case_id)?;
        let path = self.cases.join(format!("{case_id}.toml"));
        if !path.exists() {
            bail!("case {} not found at {}", case_id, path.display());
        }
        Ok(path)
    }
}

/// List all available cases.
pub fn list_cases(dirs: &EvalDirs) -> Result<()> {
    for case in discover_cases(&dirs.cases)? {
        println!("{}\t{}\t{}", case.case.id, case.case.category, case.case.question);
    }
    Ok(())
}

/// Run a case by id against `repo`, `runs` times with a fresh session each.
///
/// The repository's own `.scout/config.toml` supplies engine settings.
pub fn run_case_by_id(dirs: &EvalDirs, case_id: &str, repo: &Path, runs: u32) -> Result<()> {
    if runs == 0 {
        bail!("--runs must be > 0");
    }
    let case_path = dirs.case_path(case_id)?;
    let case = CaseFile::load(&case_path).context("load case")?;
    let base_cfg = load_config(&ScoutPaths::new(repo).config_path).context("load scout config")?;
    debug!(case_id, runs, "case loaded");

    let batch = batch_id();
    info!(case_id, runs, batch = %batch, "starting runs");
    for run_num in 1..=runs {
        debug!(case_id, run_num, runs, "starting run");
        let engine = HttpEngine::from_config(&base_cfg.engine)?;
        let target = CaseTarget {
            case_path: &case_path,
            case: &case,
            repo,
            results_base: &dirs.results,
            batch: &batch,
        };
        let outcome = run_case(target, base_cfg.clone(), engine, run_num).context("run case")?;
        println!(
            "run: case={} eval_run_id={} outcome={:?} results={}",
            case_id,
            outcome.eval_run_id,
            outcome.outcome,
            outcome.results_dir.display()
        );
    }
    Ok(())
}

/// Show aggregated results for a case.
pub fn report_case(dirs: &EvalDirs, case_id: &str, k: usize) -> Result<()> {
    validate_case_id(case_id)?;
    let (summary, warnings) = aggregate(&dirs.results.join(case_id))?;
    println!("report: case={} runs={}", case_id, summary.runs);
    println!(
        "report: pass={} fail={} aborted={} error={}",
        summary.pass, summary.fail, summary.aborted, summary.error
    );
    if let (Some(rate), Some(flakiness)) = (summary.pass_rate(), summary.flakiness()) {
        println!(
            "report: pass_rate={rate:.3} flaky={} flakiness={flakiness:.2}",
            summary.flaky()
        );
    }
    match summary.pass_at_k(k) {
        Some(estimate) => println!("report: pass@{k}={estimate:.3}"),
        None => println!("report: pass@{k}=n/a (need at least {k} runs)"),
    }
    if let Some(avg) = summary.avg_duration_secs {
        println!("report: avg_duration_secs={avg:.2}");
    }
    if let (Some(precision), Some(recall), Some(f1)) =
        (summary.mean_precision, summary.mean_recall, summary.mean_f1)
    {
        println!("report: precision={precision:.3} recall={recall:.3} f1={f1:.3}");
    }
    if let (Some(calls), Some(files)) = (summary.mean_tool_calls, summary.mean_files_read) {
        println!("report: mean_tool_calls={calls:.1} mean_files_read={files:.1}");
    }
    for (label, (passed, total)) in &summary.check_pass_rates {
        println!("report: check {label} {passed}/{total}");
    }
    if let Some(regression) = summary.regression(case_id) {
        println!("report: regression {regression}");
    }
    for warning in warnings {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

/// Per-category pass rates, problem categories, and regressions across
/// every case with stored results.
pub fn summarize(dirs: &EvalDirs) -> Result<()> {
    let (categories, warnings) = aggregate_by_category(&dirs.results)?;
    let mut rows: Vec<_> = categories.iter().collect();
    rows.sort_by(|a, b| a.1.pass_rate().total_cmp(&b.1.pass_rate()));
    for (name, metrics) in rows {
        println!(
            "summary: category={name} cases={} runs={} passed={} failed={} pass_rate={:.1}% avg_citations={:.1} citation_accuracy={:.1}%",
            metrics.cases,
            metrics.runs,
            metrics.passed,
            metrics.failed(),
            metrics.pass_rate(),
            metrics.avg_citations(),
            metrics.citation_accuracy()
        );
    }
    for (name, rate) in problem_categories(&categories, PROBLEM_PASS_RATE) {
        println!("summary: problem category={name} pass_rate={rate:.1}%");
    }
    for regression in category_regressions(&categories) {
        println!("summary: regression {regression}");
    }
    for warning in warnings {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

/// Remove stored results for a case.
pub fn clean_case(dirs: &EvalDirs, case_id: &str) -> Result<()> {
    validate_case_id(case_id)?;
    let case_results = dirs.results.join(case_id);
    if case_results.exists() {
        std::fs::remove_dir_all(&case_results)
            .with_context(|| format!("remove {}", case_results.display()))?;
    }
    println!("clean: case={} results={}", case_id, case_results.display());
    Ok(())
}
