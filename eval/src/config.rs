//! Assistant configuration merging.
//!
//! Applies case-specific overrides to the repository's scout configuration.

use anyhow::Result;
use scout::io::config::ScoutConfig;

use crate::case::CaseConfig;

/// Apply case overrides to the base config.
///
/// Eval runs never read or write the response cache: every run must reach
/// the engine for pass@k to mean anything.
pub fn apply_case_config(mut base: ScoutConfig, overrides: &CaseConfig) -> Result<ScoutConfig> {
    if let Some(max_total_calls) = overrides.max_total_calls {
        base.breaker.max_total_calls = max_total_calls;
    }
    if let Some(policy) = overrides.verification_policy {
        base.verification.policy = policy;
    }
    base.cache.enabled = false;
    base.session.transcripts = false;
    base.validate()?;
    Ok(base)
}
