//! Scout configuration stored under `.scout/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::grounding::VerificationPolicy;
use crate::core::ledger::BreakerLimits;

/// Scout configuration (TOML).
///
/// Meant to be edited by hand. Missing tables and fields fall back to defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoutConfig {
    pub engine: EngineConfig,
    pub retry: RetryConfig,
    pub breaker: BreakerLimits,
    pub verification: VerificationConfig,
    pub tools: ToolLimits,
    pub session: SessionConfig,
    pub cache: CacheConfig,
}

/// Known OpenAI-compatible providers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    OpenRouter,
    Groq,
    Custom,
}

impl Provider {
    pub fn default_base_url(self) -> Option<&'static str> {
        match self {
            Self::OpenRouter => Some("https://openrouter.ai/api/v1"),
            Self::Groq => Some("https://api.groq.com/openai/v1"),
            Self::Custom => None,
        }
    }

    pub fn default_api_key_env(self) -> &'static str {
        match self {
            Self::OpenRouter => "OPENROUTER_API_KEY",
            Self::Groq => "GROQ_API_KEY",
            Self::Custom => "SCOUT_API_KEY",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub provider: Provider,
    pub model: String,
    /// Overrides the provider's base URL. Required for `custom`.
    pub base_url: Option<String>,
    /// Environment variable holding the API key. Defaults per provider.
    pub api_key_env: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider: Provider::OpenRouter,
            model: "x-ai/grok-4.1-fast".to_string(),
            base_url: None,
            api_key_env: None,
            timeout_secs: 120,
            temperature: 0.0,
        }
    }
}

impl EngineConfig {
    pub fn resolved_base_url(&self) -> Result<String> {
        self.base_url
            .clone()
            .or_else(|| self.provider.default_base_url().map(str::to_string))
            .ok_or_else(|| anyhow!("engine.base_url is required for the custom provider"))
    }

    pub fn resolved_api_key_env(&self) -> String {
        self.api_key_env
            .clone()
            .unwrap_or_else(|| self.provider.default_api_key_env().to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 4_000,
            max_delay_ms: 30_000,
            multiplier: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerificationConfig {
    pub policy: VerificationPolicy,
    /// Append a note to answers whose citations were stripped.
    pub removal_note: bool,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            policy: VerificationPolicy::Strict,
            removal_note: true,
        }
    }
}

/// Bounds applied by the exploration tools.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolLimits {
    pub max_read_lines: usize,
    pub max_file_bytes: u64,
    pub max_search_results: usize,
    pub max_find_results: usize,
    pub max_tree_depth: usize,
    /// Worker threads used to run one batch of tool requests.
    pub max_parallel: usize,
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self {
            max_read_lines: 500,
            max_file_bytes: 1024 * 1024,
            max_search_results: 20,
            max_find_results: 30,
            max_tree_depth: 3,
            max_parallel: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    pub max_history_messages: usize,
    pub max_context_facts: usize,
    /// Estimated token budget for tool output in one session.
    pub max_context_tokens: usize,
    /// Write a JSON transcript per turn under `.scout/transcripts/`.
    pub transcripts: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_history_messages: 20,
            max_context_facts: 10,
            max_context_tokens: 100_000,
            transcripts: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Defaults to `<repo>/.scout/cache`.
    pub dir: Option<PathBuf>,
    pub max_age_days: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            max_age_days: 7,
        }
    }
}

impl ScoutConfig {
    pub fn validate(&self) -> Result<()> {
        let breaker = &self.breaker;
        if breaker.max_total_calls == 0 {
            return Err(anyhow!("breaker.max_total_calls must be > 0"));
        }
        if breaker.window == 0 {
            return Err(anyhow!("breaker.window must be > 0"));
        }
        if breaker.repetition_threshold == 0 || breaker.repetition_threshold > breaker.window {
            return Err(anyhow!(
                "breaker.repetition_threshold must be between 1 and breaker.window"
            ));
        }
        if breaker.max_calls_without_new_info == 0 || breaker.max_calls_per_tool == 0 {
            return Err(anyhow!("breaker limits must be > 0"));
        }
        if breaker.output_fingerprint_chars == 0 {
            return Err(anyhow!("breaker.output_fingerprint_chars must be > 0"));
        }
        if self.engine.model.trim().is_empty() {
            return Err(anyhow!("engine.model must be non-empty"));
        }
        if self.engine.timeout_secs == 0 {
            return Err(anyhow!("engine.timeout_secs must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be > 0"));
        }
        if self.tools.max_parallel == 0 {
            return Err(anyhow!("tools.max_parallel must be > 0"));
        }
        if self.tools.max_read_lines == 0 {
            return Err(anyhow!("tools.max_read_lines must be > 0"));
        }
        if self.session.max_history_messages == 0 {
            return Err(anyhow!("session.max_history_messages must be > 0"));
        }
        if self.session.max_context_tokens == 0 {
            return Err(anyhow!("session.max_context_tokens must be > 0"));
        }
        if self.cache.max_age_days <= 0 {
            return Err(anyhow!("cache.max_age_days must be > 0"));
        }
        Ok(())
    }
}

/// Paths scout owns inside an analyzed repository.
#[derive(Debug, Clone)]
pub struct ScoutPaths {
    pub root: PathBuf,
    pub scout_dir: PathBuf,
    pub config_path: PathBuf,
    pub cache_dir: PathBuf,
    pub transcripts_dir: PathBuf,
}

impl ScoutPaths {
    pub fn new(root: &Path) -> Self {
        let scout_dir = root.join(".scout");
        Self {
            root: root.to_path_buf(),
            config_path: scout_dir.join("config.toml"),
            cache_dir: scout_dir.join("cache"),
            transcripts_dir: scout_dir.join("transcripts"),
            scout_dir,
        }
    }

    pub fn cache_dir_for(&self, cfg: &CacheConfig) -> PathBuf {
        cfg.dir.clone().unwrap_or_else(|| self.cache_dir.clone())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ScoutConfig::default()`.
pub fn load_config(path: &Path) -> Result<ScoutConfig> {
    if !path.exists() {
        let cfg = ScoutConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ScoutConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ScoutConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

/// Write `contents` to a sibling temp file, then rename over `path`.
///
/// The temp name carries the pid and a nanosecond stamp so concurrent writers
/// of the same key never share a temp file; the last rename wins.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let file_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_string_lossy();
    let stamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let tmp_path = parent.join(format!(".{file_name}.{}.{stamp}.tmp", std::process::id()));
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
