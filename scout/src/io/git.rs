//! Read-only git queries against the analyzed repository.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::io::process::run_with_timeout;

const GIT_TIMEOUT: Duration = Duration::from_secs(5);
const GIT_OUTPUT_LIMIT: usize = 4096;

#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Full HEAD sha, or `None` when the directory is not a git checkout,
    /// has no commits, or git is unavailable.
    pub fn head_sha(&self) -> Option<String> {
        let out = match run_with_timeout(
            "git",
            &["rev-parse", "HEAD"],
            &self.workdir,
            GIT_TIMEOUT,
            GIT_OUTPUT_LIMIT,
        ) {
            Ok(out) => out,
            Err(err) => {
                debug!(err = %err, "git unavailable");
                return None;
            }
        };
        if !out.succeeded() {
            return None;
        }
        let sha = out.stdout_text().trim().to_string();
        is_sha(&sha).then_some(sha)
    }
}

fn is_sha(s: &str) -> bool {
    (7..=64).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_hexdigit())
}
