//! On-disk response cache keyed by repository state, question, and model.
//!
//! Entries are JSON files named `{repo}_{question}_{model}.json`. A corrupt
//! or expired entry is deleted and treated as a miss.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::io::config::write_atomic;
use crate::io::git::Git;

const STATE_FILES: &[&str] = &[
    "requirements.txt",
    "pyproject.toml",
    "setup.py",
    "package.json",
    "Cargo.toml",
    "go.mod",
    "pom.xml",
    "build.gradle",
    "README.md",
    "README.rst",
];
const GITIGNORE: &str = "*\n!.gitignore\n";
/// Top-level entries left out of the non-git fingerprint. Scout writes its
/// own state under `.scout`.
const UNTRACKED_DIRS: &[&str] = &[".scout", ".git"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedToolCall {
    pub name: String,
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub response: String,
    pub tool_calls: Vec<CachedToolCall>,
    /// RFC 3339 timestamp.
    pub created_at: String,
    pub repo_path: String,
}

impl CacheEntry {
    pub fn new(response: &str, tool_calls: Vec<CachedToolCall>, repo_path: &Path) -> Self {
        Self {
            response: response.to_string(),
            tool_calls,
            created_at: Utc::now().to_rfc3339(),
            repo_path: repo_path.display().to_string(),
        }
    }

    fn created(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.created_at)
            .ok()
            .map(|at| at.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub oldest: Option<String>,
    pub newest: Option<String>,
}

fn short_sha256(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..16].to_string()
}

fn mtime_secs(path: &Path) -> u64 {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|at| at.duration_since(UNIX_EPOCH).ok())
        .map(|age| age.as_secs())
        .unwrap_or_default()
}

/// Count and newest mtime of the top-level entries, skipping scout's own
/// directories. The root's mtime is not used: creating `.scout` changes it.
fn tree_state(repo: &Path) -> String {
    let Ok(entries) = fs::read_dir(repo) else {
        return "tree:none".to_string();
    };
    let (count, newest) = entries
        .filter_map(Result::ok)
        .filter(|entry| {
            let name = entry.file_name();
            !UNTRACKED_DIRS.iter().any(|skip| name == *skip)
        })
        .fold((0usize, 0u64), |(count, newest), entry| {
            (count + 1, newest.max(mtime_secs(&entry.path())))
        });
    format!("tree:{count}:{newest}")
}

/// Fingerprint of the repository state: HEAD (or the top-level tree state)
/// plus the mtime and size of well-known manifest files.
pub fn repo_state_hash(repo: &Path) -> String {
    let mut parts = vec![match Git::new(repo).head_sha() {
        Some(sha) => format!("git:{sha}"),
        None => tree_state(repo),
    }];
    for name in STATE_FILES {
        let path = repo.join(name);
        if let Ok(meta) = fs::metadata(&path)
            && meta.is_file()
        {
            parts.push(format!("{name}:{}:{}", mtime_secs(&path), meta.len()));
        }
    }
    parts.sort();
    short_sha256(&parts.join("|"))
}

pub fn question_hash(question: &str) -> String {
    short_sha256(&question.trim().to_lowercase())
}

pub struct ResponseCache {
    dir: PathBuf,
    max_age: chrono::Duration,
}

impl ResponseCache {
    pub fn new(dir: impl Into<PathBuf>, max_age_days: i64) -> Self {
        Self {
            dir: dir.into(),
            max_age: chrono::Duration::days(max_age_days),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, repo_hash: &str, question: &str, model: &str) -> PathBuf {
        let model = model.replace('/', "_");
        self.dir
            .join(format!("{repo_hash}_{}_{model}.json", question_hash(question)))
    }

    fn entries(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        for entry in
            fs::read_dir(&self.dir).with_context(|| format!("read {}", self.dir.display()))?
        {
            let path = entry
                .with_context(|| format!("read {}", self.dir.display()))?
                .path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn discard(path: &Path, why: &str) {
        warn!(path = %path.display(), why, "discarding cache entry");
        if let Err(err) = fs::remove_file(path) {
            debug!(path = %path.display(), err = %err, "could not remove cache entry");
        }
    }

    pub fn get(&self, repo_hash: &str, question: &str, model: &str) -> Option<CacheEntry> {
        let path = self.entry_path(repo_hash, question, model);
        let contents = fs::read_to_string(&path).ok()?;
        let entry: CacheEntry = match serde_json::from_str(&contents) {
            Ok(entry) => entry,
            Err(_) => {
                Self::discard(&path, "corrupt");
                return None;
            }
        };
        let Some(created) = entry.created() else {
            Self::discard(&path, "corrupt");
            return None;
        };
        if Utc::now() - created > self.max_age {
            Self::discard(&path, "expired");
            return None;
        }
        debug!(path = %path.display(), "cache hit");
        Some(entry)
    }

    pub fn put(&self, repo_hash: &str, question: &str, model: &str, entry: &CacheEntry) -> Result<()> {
        self.ensure_dir()?;
        let path = self.entry_path(repo_hash, question, model);
        let mut buf = serde_json::to_string_pretty(entry).context("serialize cache entry")?;
        buf.push('\n');
        write_atomic(&path, buf.as_bytes())?;
        debug!(path = %path.display(), "cached response");
        Ok(())
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create directory {}", self.dir.display()))?;
        let ignore = self.dir.join(".gitignore");
        if !ignore.exists() {
            fs::write(&ignore, GITIGNORE).with_context(|| format!("write {}", ignore.display()))?;
        }
        Ok(())
    }

    /// Delete entries recorded for any other repository state.
    pub fn invalidate_stale(&self, current_repo_hash: &str) -> Result<usize> {
        let prefix = format!("{current_repo_hash}_");
        let mut removed = 0;
        for path in self.entries()? {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !name.starts_with(&prefix) {
                fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
                removed += 1;
            }
        }
        debug!(removed, "invalidated stale cache entries");
        Ok(removed)
    }

    pub fn clear(&self) -> Result<usize> {
        let paths = self.entries()?;
        for path in &paths {
            fs::remove_file(path).with_context(|| format!("remove {}", path.display()))?;
        }
        Ok(paths.len())
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats::default();
        let mut stamps = Vec::new();
        for path in self.entries()? {
            stats.entries += 1;
            stats.total_bytes += fs::metadata(&path).map(|m| m.len()).unwrap_or_default();
            if let Ok(contents) = fs::read_to_string(&path)
                && let Ok(entry) = serde_json::from_str::<CacheEntry>(&contents)
                && let Some(created) = entry.created()
            {
                stamps.push(created);
            }
        }
        stamps.sort();
        stats.oldest = stamps.first().map(DateTime::to_rfc3339);
        stats.newest = stamps.last().map(DateTime::to_rfc3339);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn entry(response: &str) -> CacheEntry {
        CacheEntry::new(
            response,
            vec![CachedToolCall {
                name: "read_file".to_string(),
                args: json!({"file_path": "a.py"}),
            }],
            Path::new("/repo"),
        )
    }

    #[test]
    fn question_hash_ignores_case_and_padding() {
        assert_eq!(question_hash("  Where is MAIN? "), question_hash("where is main?"));
        assert_eq!(question_hash("x").len(), 16);
    }

    #[test]
    fn put_then_get_hits_and_writes_gitignore() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cache = ResponseCache::new(temp.path().join("cache"), 7);
        cache.put("abc", "Where?", "x-ai/grok", &entry("answer")).expect("put");

        let hit = cache.get("abc", "where?", "x-ai/grok").expect("hit");
        assert_eq!(hit.response, "answer");
        assert!(cache.get("abc", "where?", "other").is_none());
        assert!(temp.path().join(format!("cache/abc_{}_x-ai_grok.json", question_hash("where?"))).exists());
        let ignore = fs::read_to_string(temp.path().join("cache/.gitignore")).expect("gitignore");
        assert_eq!(ignore, "*\n!.gitignore\n");
    }

    #[test]
    fn serializes_camel_case_fields() {
        let json = serde_json::to_value(entry("a")).expect("serialize");
        assert!(json.get("toolCalls").is_some());
        assert!(json.get("createdAt").is_some());
        assert!(json.get("repoPath").is_some());
    }

    #[test]
    fn expired_and_corrupt_entries_are_removed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cache = ResponseCache::new(temp.path(), 7);
        let mut old = entry("old");
        old.created_at = (Utc::now() - chrono::Duration::days(8)).to_rfc3339();
        cache.put("r", "old question", "m", &old).expect("put");
        let old_path = cache.entry_path("r", "old question", "m");
        assert!(cache.get("r", "old question", "m").is_none());
        assert!(!old_path.exists());

        let bad_path = cache.entry_path("r", "bad", "m");
        fs::write(&bad_path, "{not json").expect("write");
        assert!(cache.get("r", "bad", "m").is_none());
        assert!(!bad_path.exists());
    }

    #[test]
    fn invalidate_clear_and_stats() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cache = ResponseCache::new(temp.path(), 7);
        cache.put("old", "q1", "m", &entry("a")).expect("put");
        cache.put("new", "q2", "m", &entry("b")).expect("put");
        cache.put("new", "q3", "m", &entry("c")).expect("put");

        assert_eq!(cache.stats().expect("stats").entries, 3);
        assert_eq!(cache.invalidate_stale("new").expect("invalidate"), 1);
        let stats = cache.stats().expect("stats");
        assert_eq!(stats.entries, 2);
        assert!(stats.oldest.is_some());
        assert_eq!(cache.clear().expect("clear"), 2);
        assert_eq!(cache.stats().expect("stats").entries, 0);
        assert!(temp.path().join(".gitignore").exists());
    }

    #[test]
    fn repo_hash_tracks_manifest_changes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let before = repo_state_hash(temp.path());
        assert_eq!(before.len(), 16);
        assert_eq!(before, repo_state_hash(temp.path()));
        fs::write(temp.path().join("Cargo.toml"), "[package]\nname = \"x\"\n").expect("write");
        assert_ne!(before, repo_state_hash(temp.path()));
    }

    #[test]
    fn first_put_does_not_change_repo_hash() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("main.py"), "print(1)\n").expect("write");
        let hash = repo_state_hash(temp.path());

        let cache = ResponseCache::new(temp.path().join(".scout").join("cache"), 7);
        let entry = CacheEntry::new("answer", Vec::new(), temp.path());
        cache.put(&hash, "q", "m", &entry).expect("put");

        let again = repo_state_hash(temp.path());
        assert_eq!(hash, again);
        assert_eq!(cache.get(&again, "q", "m").map(|hit| hit.response), Some("answer".to_string()));
    }
}
