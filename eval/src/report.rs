use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::judge::Judgment;
use crate::outcome::Outcome;
use crate::results::read_meta;
use crate::run::batch_of;

/// Percentage drop from the baseline that counts as a regression.
pub const REGRESSION_DROP_PCT: f64 = 10.0;
/// Batches before the latest one averaged into the baseline.
pub const BASELINE_BATCHES: usize = 3;

#[derive(Debug, Default)]
pub struct ReportSummary {
    pub runs: usize,
    pub pass: usize,
    pub fail: usize,
    pub aborted: usize,
    pub error: usize,
    pub avg_duration_secs: Option<f64>,
    /// Means over runs that produced an answer.
    pub mean_precision: Option<f64>,
    pub mean_recall: Option<f64>,
    pub mean_f1: Option<f64>,
    pub mean_tool_calls: Option<f64>,
    pub mean_files_read: Option<f64>,
    pub check_pass_rates: BTreeMap<String, (usize, usize)>,
    /// `(runs, passed)` per batch, keyed by batch id in time order.
    pub batches: BTreeMap<String, (usize, usize)>,
}

impl ReportSummary {
    pub fn pass_rate(&self) -> Option<f64> {
        (self.runs > 0).then(|| self.pass as f64 / self.runs as f64)
    }

    /// Some runs pass and some do not.
    pub fn flaky(&self) -> bool {
        self.pass > 0 && self.pass < self.runs
    }

    /// 0 when every run agrees, 1 at an even pass/fail split.
    pub fn flakiness(&self) -> Option<f64> {
        self.pass_rate().map(|rate| 2.0 * rate.min(1.0 - rate))
    }

    pub fn pass_at_k(&self, k: usize) -> Option<f64> {
        pass_at_k(self.runs, self.pass, k)
    }

    pub fn regression(&self, name: &str) -> Option<RegressionWarning> {
        detect_regression(name, &self.batches)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegressionWarning {
    pub name: String,
    /// Pass rate of the latest batch, in percent.
    pub current: f64,
    /// Mean pass rate of the batches before it, in percent.
    pub baseline: f64,
    pub drop_pct: f64,
}

impl fmt::Display for RegressionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} dropped {:.1}% (from avg {:.1}% to {:.1}%)",
            self.name, self.drop_pct, self.baseline, self.current
        )
    }
}

/// Compare the latest batch's pass rate with the mean of the
/// [`BASELINE_BATCHES`] batches before it.
pub fn detect_regression(
    name: &str,
    batches: &BTreeMap<String, (usize, usize)>,
) -> Option<RegressionWarning> {
    let rates: Vec<f64> = batches
        .values()
        .filter(|(runs, _)| *runs > 0)
        .map(|(runs, passed)| *passed as f64 / *runs as f64 * 100.0)
        .collect();
    let (current, history) = rates.split_last()?;
    let recent = &history[history.len().saturating_sub(BASELINE_BATCHES)..];
    if recent.is_empty() {
        return None;
    }
    let baseline = recent.iter().sum::<f64>() / recent.len() as f64;
    if baseline <= 0.0 {
        return None;
    }
    let drop_pct = (baseline - current) / baseline * 100.0;
    (drop_pct > REGRESSION_DROP_PCT).then(|| RegressionWarning {
        name: name.to_string(),
        current: *current,
        baseline,
        drop_pct,
    })
}

/// Record one run's outcome under its batch.
pub fn add_to_batch(batches: &mut BTreeMap<String, (usize, usize)>, eval_run_id: &str, passed: bool) {
    let slot = batches.entry(batch_of(eval_run_id).to_string()).or_insert((0, 0));
    slot.0 += 1;
    if passed {
        slot.1 += 1;
    }
}

/// Unbiased pass@k: the chance that at least one of `k` runs drawn without
/// replacement from `n` runs (of which `c` passed) passes.
///
/// `1 - C(n-c, k) / C(n, k)`, computed as a running product to stay finite.
pub fn pass_at_k(n: usize, c: usize, k: usize) -> Option<f64> {
    if k == 0 || k > n || c > n {
        return None;
    }
    if n - c < k {
        return Some(1.0);
    }
    let miss: f64 = ((n - c + 1)..=n)
        .map(|i| 1.0 - k as f64 / i as f64)
        .product();
    Some(1.0 - miss)
}

pub fn load_run_dirs(case_results_dir: &Path) -> Result<Vec<PathBuf>> {
    if !case_results_dir.exists() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(case_results_dir)
        .with_context(|| format!("read {}", case_results_dir.display()))?
    {
        let entry = entry.context("read entry")?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

#[derive(Default)]
struct Mean {
    total: f64,
    count: usize,
}

impl Mean {
    fn add(&mut self, value: f64) {
        self.total += value;
        self.count += 1;
    }

    fn get(&self) -> Option<f64> {
        (self.count > 0).then(|| self.total / self.count as f64)
    }
}

pub fn aggregate(case_results_dir: &Path) -> Result<(ReportSummary, Vec<String>)> {
    let mut summary = ReportSummary::default();
    let mut warnings = Vec::new();
    let (mut duration, mut precision, mut recall, mut f1, mut calls, mut files) = (
        Mean::default(),
        Mean::default(),
        Mean::default(),
        Mean::default(),
        Mean::default(),
        Mean::default(),
    );

    for run_dir in load_run_dirs(case_results_dir)? {
        let meta = match read_meta(&run_dir.join("meta.json")) {
            Ok(meta) => meta,
            Err(err) => {
                warnings.push(format!(
                    "skip {}: meta.json invalid ({err:#})",
                    run_dir.display()
                ));
                continue;
            }
        };

        let checks_path = run_dir.join("checks.json");
        match fs::read_to_string(&checks_path)
            .with_context(|| format!("read {}", checks_path.display()))
            .and_then(|contents| {
                serde_json::from_str::<Judgment>(&contents).context("parse checks")
            }) {
            Ok(judgment) => update_check_pass_rates(&mut summary.check_pass_rates, &judgment),
            Err(err) => warnings.push(format!(
                "{}: checks.json invalid ({err:#})",
                run_dir.display()
            )),
        }

        summary.runs += 1;
        add_to_batch(&mut summary.batches, &meta.eval_run_id, meta.outcome == Outcome::Pass);
        match meta.outcome {
            Outcome::Pass => summary.pass += 1,
            Outcome::Fail => summary.fail += 1,
            Outcome::Aborted => summary.aborted += 1,
            Outcome::Error => summary.error += 1,
        }
        duration.add(meta.duration_secs);
        if let Some(metrics) = &meta.metrics {
            precision.add(metrics.precision);
            recall.add(metrics.recall);
            f1.add(metrics.f1);
            calls.add(metrics.tool_calls as f64);
            files.add(metrics.files_read as f64);
        }
    }

    summary.avg_duration_secs = duration.get();
    summary.mean_precision = precision.get();
    summary.mean_recall = recall.get();
    summary.mean_f1 = f1.get();
    summary.mean_tool_calls = calls.get();
    summary.mean_files_read = files.get();
    Ok((summary, warnings))
}

fn update_check_pass_rates(stats: &mut BTreeMap<String, (usize, usize)>, judgment: &Judgment) {
    for check in &judgment.checks {
        let entry = stats.entry(check.label.clone()).or_insert((0, 0));
        if check.passed {
            entry.0 += 1;
        }
        entry.1 += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::{CheckOutcome, RunMetrics};
    use crate::results::EvalMeta;
    use tempfile::tempdir;

    fn write_run(dir: &Path, outcome: Outcome, duration: f64, metrics: Option<RunMetrics>) {
        let run_id = dir
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("run")
            .to_string();
        write_run_as(dir, "case", "general", &run_id, outcome, duration, metrics);
    }

    fn write_run_as(
        dir: &Path,
        case_id: &str,
        category: &str,
        eval_run_id: &str,
        outcome: Outcome,
        duration: f64,
        metrics: Option<RunMetrics>,
    ) {
        fs::create_dir_all(dir).expect("run dir");
        let meta = EvalMeta {
            case_id: case_id.to_string(),
            category: category.to_string(),
            eval_run_id: eval_run_id.to_string(),
            case_hash: "hash".to_string(),
            repo_git_sha: None,
            repo: "/tmp/repo".to_string(),
            model: "scripted/test".to_string(),
            outcome,
            start_time: "now".to_string(),
            end_time: "later".to_string(),
            duration_secs: duration,
            metrics,
            error: None,
            errors: Vec::new(),
        };
        let contents = serde_json::to_string_pretty(&meta).expect("meta json");
        fs::write(dir.join("meta.json"), format!("{contents}\n")).expect("write meta");

        let judgment = Judgment {
            checks: vec![CheckOutcome {
                label: "not_aborted".to_string(),
                passed: outcome != Outcome::Aborted,
                detail: String::new(),
            }],
        };
        let contents = serde_json::to_string_pretty(&judgment).expect("checks json");
        fs::write(dir.join("checks.json"), format!("{contents}\n")).expect("write checks");
    }

    fn metrics(precision: f64, tool_calls: usize) -> RunMetrics {
        RunMetrics {
            precision,
            recall: precision,
            f1: precision,
            tool_calls,
            files_read: 1,
            ..RunMetrics::default()
        }
    }

    #[test]
    fn aggregates_runs() {
        let temp = tempdir().expect("tempdir");
        write_run(&temp.path().join("run1"), Outcome::Pass, 5.0, Some(metrics(1.0, 4)));
        write_run(&temp.path().join("run2"), Outcome::Fail, 15.0, Some(metrics(0.5, 6)));
        write_run(&temp.path().join("run3"), Outcome::Aborted, 10.0, None);
        fs::create_dir_all(temp.path().join("junk")).expect("junk dir");

        let (summary, warnings) = aggregate(temp.path()).expect("aggregate");
        assert_eq!(warnings.len(), 1);
        assert_eq!(summary.runs, 3);
        assert_eq!((summary.pass, summary.fail, summary.aborted), (1, 1, 1));
        assert_eq!(summary.avg_duration_secs, Some(10.0));
        assert_eq!(summary.mean_precision, Some(0.75));
        assert_eq!(summary.mean_tool_calls, Some(5.0));
        assert!(summary.flaky());
        let flakiness = summary.flakiness().expect("flakiness");
        assert!((flakiness - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(
            summary.check_pass_rates.get("not_aborted"),
            Some(&(2, 3))
        );
    }

    #[test]
    fn latest_batch_below_recent_average_is_a_regression() {
        let temp = tempdir().expect("tempdir");
        let batches = [
            ("eval-20260101_000000", [true, true]),
            ("eval-20260102_000000", [true, true]),
            ("eval-20260103_000000", [true, false]),
            ("eval-20260104_000000", [false, false]),
        ];
        for (batch, passes) in batches {
            for (n, passed) in passes.into_iter().enumerate() {
                let id = format!("{batch}-{:02}", n + 1);
                let outcome = if passed { Outcome::Pass } else { Outcome::Fail };
                write_run(&temp.path().join(&id), outcome, 1.0, None);
            }
        }
        let (summary, _) = aggregate(temp.path()).expect("aggregate");
        assert_eq!(summary.batches.len(), 4);

        let warning = summary.regression("case").expect("regression");
        assert_eq!(warning.current, 0.0);
        let expected = (100.0 + 100.0 + 50.0) / 3.0;
        assert!((warning.baseline - expected).abs() < 1e-9);
        assert!((warning.drop_pct - 100.0).abs() < 1e-9);
        assert!(warning.to_string().starts_with("case dropped 100.0%"));
    }

    #[test]
    fn steady_or_single_batches_are_not_regressions() {
        let mut batches = BTreeMap::new();
        add_to_batch(&mut batches, "eval-20260101_000000-01", true);
        assert_eq!(detect_regression("c", &batches), None);
        add_to_batch(&mut batches, "eval-20260102_000000-01", true);
        add_to_batch(&mut batches, "eval-20260102_000000-02", true);
        assert_eq!(detect_regression("c", &batches), None);
        // 100% -> 95%: a 5% drop stays under the threshold.
        let mut small = BTreeMap::new();
        small.insert("a".to_string(), (20, 20));
        small.insert("b".to_string(), (20, 19));
        assert_eq!(detect_regression("c", &small), None);
    }

    #[test]
    fn empty_results_have_no_rates() {
        let temp = tempdir().expect("tempdir");
        let (summary, warnings) = aggregate(&temp.path().join("missing")).expect("aggregate");
        assert!(warnings.is_empty());
        assert_eq!(summary.pass_rate(), None);
        assert_eq!(summary.mean_f1, None);
        assert!(!summary.flaky());
    }

    #[test]
    fn pass_at_k_matches_the_closed_form() {
        assert_eq!(pass_at_k(5, 0, 1), Some(0.0));
        assert_eq!(pass_at_k(5, 5, 3), Some(1.0));
        assert_eq!(pass_at_k(5, 3, 3), Some(1.0));
        let estimate = pass_at_k(10, 3, 1).expect("pass@1");
        assert!((estimate - 0.3).abs() < 1e-9);
        // 1 - C(8,2)/C(10,2) = 1 - 28/45
        let estimate = pass_at_k(10, 2, 2).expect("pass@2");
        assert!((estimate - 17.0 / 45.0).abs() < 1e-9);
        assert_eq!(pass_at_k(3, 1, 4), None);
        assert_eq!(pass_at_k(3, 1, 0), None);
    }
}
