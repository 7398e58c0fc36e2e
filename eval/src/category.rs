//! Per-category aggregation across every case with stored results.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::report::{RegressionWarning, add_to_batch, detect_regression, load_run_dirs};
use crate::results::read_meta;

/// Categories below this pass rate (percent) are reported as problem areas.
pub const PROBLEM_PASS_RATE: f64 = 70.0;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryMetrics {
    pub cases: usize,
    pub runs: usize,
    pub passed: usize,
    pub citations: usize,
    pub valid_citations: usize,
    pub batches: BTreeMap<String, (usize, usize)>,
}

impl CategoryMetrics {
    pub fn failed(&self) -> usize {
        self.runs - self.passed
    }

    /// Percent of runs that passed.
    pub fn pass_rate(&self) -> f64 {
        if self.runs == 0 {
            return 0.0;
        }
        self.passed as f64 / self.runs as f64 * 100.0
    }

    pub fn avg_citations(&self) -> f64 {
        if self.runs == 0 {
            return 0.0;
        }
        self.citations as f64 / self.runs as f64
    }

    /// Percent of citations that survived verification.
    pub fn citation_accuracy(&self) -> f64 {
        if self.citations == 0 {
            return 0.0;
        }
        self.valid_citations as f64 / self.citations as f64 * 100.0
    }
}

/// Group every stored run under `results_root` by its case category.
pub fn aggregate_by_category(
    results_root: &Path,
) -> Result<(BTreeMap<String, CategoryMetrics>, Vec<String>)> {
    let mut categories: BTreeMap<String, CategoryMetrics> = BTreeMap::new();
    let mut warnings = Vec::new();
    if !results_root.exists() {
        return Ok((categories, warnings));
    }

    let mut case_dirs: Vec<_> = fs::read_dir(results_root)
        .with_context(|| format!("read {}", results_root.display()))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    case_dirs.sort();

    for case_dir in case_dirs {
        let mut counted_case = false;
        for run_dir in load_run_dirs(&case_dir)? {
            let meta = match read_meta(&run_dir.join("meta.json")) {
                Ok(meta) => meta,
                Err(err) => {
                    warnings.push(format!("skip {}: {err:#}", run_dir.display()));
                    continue;
                }
            };
            let metrics = categories.entry(meta.category.clone()).or_default();
            if !counted_case {
                metrics.cases += 1;
                counted_case = true;
            }
            metrics.runs += 1;
            if meta.outcome.passed() {
                metrics.passed += 1;
            }
            if let Some(run) = &meta.metrics {
                metrics.citations += run.citations;
                metrics.valid_citations += run.valid_citations;
            }
            add_to_batch(&mut metrics.batches, &meta.eval_run_id, meta.outcome.passed());
        }
    }
    Ok((categories, warnings))
}

/// Categories under `threshold` percent, worst first.
pub fn problem_categories(
    categories: &BTreeMap<String, CategoryMetrics>,
    threshold: f64,
) -> Vec<(&str, f64)> {
    let mut problems: Vec<(&str, f64)> = categories
        .iter()
        .map(|(name, metrics)| (name.as_str(), metrics.pass_rate()))
        .filter(|(_, rate)| *rate < threshold)
        .collect();
    problems.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
    problems
}

/// Regressions per category, largest drop first.
pub fn category_regressions(
    categories: &BTreeMap<String, CategoryMetrics>,
) -> Vec<RegressionWarning> {
    let mut found: Vec<RegressionWarning> = categories
        .iter()
        .filter_map(|(name, metrics)| detect_regression(name, &metrics.batches))
        .collect();
    found.sort_by(|a, b| b.drop_pct.total_cmp(&a.drop_pct));
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::RunMetrics;
    use crate::outcome::Outcome;
    use crate::results::EvalMeta;

    fn write_run(root: &Path, case_id: &str, category: &str, run_id: &str, outcome: Outcome, citations: usize) {
        let dir = root.join(case_id).join(run_id);
        fs::create_dir_all(&dir).expect("run dir");
        let meta = EvalMeta {
            case_id: case_id.to_string(),
            category: category.to_string(),
            eval_run_id: run_id.to_string(),
            case_hash: "hash".to_string(),
            repo_git_sha: None,
            repo: "/tmp/repo".to_string(),
            model: "scripted/test".to_string(),
            outcome,
            start_time: "now".to_string(),
            end_time: "later".to_string(),
            duration_secs: 1.0,
            metrics: Some(RunMetrics {
                citations,
                valid_citations: citations / 2,
                ..RunMetrics::default()
            }),
            error: None,
            errors: Vec::new(),
        };
        let contents = serde_json::to_string_pretty(&meta).expect("meta json");
        fs::write(dir.join("meta.json"), contents).expect("write meta");
    }

    #[test]
    fn groups_runs_by_category_across_cases() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write_run(root, "auth", "deep_dive", "eval-20260101_000000-01", Outcome::Pass, 4);
        write_run(root, "auth", "deep_dive", "eval-20260101_000000-02", Outcome::Fail, 2);
        write_run(root, "flow", "deep_dive", "eval-20260102_000000-01", Outcome::Pass, 2);
        write_run(root, "tour", "overview", "eval-20260101_000000-01", Outcome::Aborted, 0);
        fs::create_dir_all(root.join("tour/broken")).expect("broken");

        let (categories, warnings) = aggregate_by_category(root).expect("aggregate");
        assert_eq!(warnings.len(), 1);

        let deep = &categories["deep_dive"];
        assert_eq!((deep.cases, deep.runs, deep.passed, deep.failed()), (2, 3, 2, 1));
        assert!((deep.pass_rate() - 200.0 / 3.0).abs() < 1e-9);
        assert!((deep.avg_citations() - 8.0 / 3.0).abs() < 1e-9);
        assert!((deep.citation_accuracy() - 50.0).abs() < 1e-9);

        let problems = problem_categories(&categories, PROBLEM_PASS_RATE);
        assert_eq!(problems.len(), 2);
        assert_eq!(problems[0].0, "overview");
        assert_eq!(problems[1].0, "deep_dive");
    }

    #[test]
    fn category_regressions_compare_batches() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        for day in 1..=3 {
            write_run(root, "auth", "deep_dive", &format!("eval-2026010{day}_000000-01"), Outcome::Pass, 1);
        }
        write_run(root, "auth", "deep_dive", "eval-20260104_000000-01", Outcome::Fail, 1);
        write_run(root, "tour", "overview", "eval-20260104_000000-01", Outcome::Pass, 1);

        let (categories, _) = aggregate_by_category(root).expect("aggregate");
        let regressions = category_regressions(&categories);
        assert_eq!(regressions.len(), 1);
        assert_eq!(regressions[0].name, "deep_dive");
        assert!((regressions[0].baseline - 100.0).abs() < 1e-9);
    }

    #[test]
    fn missing_results_root_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (categories, warnings) =
            aggregate_by_category(&temp.path().join("absent")).expect("aggregate");
        assert!(categories.is_empty());
        assert!(warnings.is_empty());
    }
}
