//! `search_code` and `find_files_by_pattern`.

use std::fs;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use regex::Regex;
use serde_json::Value;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::io::tools::security::{
    FILTERED_LINE, display_path, is_binary, is_ignored_dir, is_sensitive, looks_like_injection,
};
use crate::io::tools::{RULE, ToolContext, arg_str, arg_usize};

const MAX_ROW_CHARS: usize = 200;

/// Regular files under `root` in name order, skipping ignored directories
/// and sensitive files.
pub(crate) fn repo_files(root: &Path) -> impl Iterator<Item = PathBuf> + '_ {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !skip_entry(entry))
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(move |entry| !is_sensitive(entry.path().strip_prefix(root).unwrap_or(entry.path())))
        .map(DirEntry::into_path)
}

fn skip_entry(entry: &DirEntry) -> bool {
    entry.file_type().is_dir() && is_ignored_dir(&entry.file_name().to_string_lossy())
}

pub(crate) fn search_code(ctx: &ToolContext, args: &Value) -> String {
    let Some(pattern) = arg_str(args, "pattern") else {
        return "Error: missing required argument 'pattern'".to_string();
    };
    let re = match Regex::new(pattern) {
        Ok(re) => re,
        Err(err) => return format!("Error: invalid regex pattern '{pattern}': {err}"),
    };
    let extension = arg_str(args, "file_extension").map(|ext| ext.trim_start_matches('.'));
    let limits = ctx.limits();
    let max_results = arg_usize(args, "max_results")
        .unwrap_or(limits.max_search_results)
        .clamp(1, limits.max_search_results);

    let mut rows = Vec::new();
    let mut truncated = false;
    'files: for path in repo_files(ctx.root()) {
        if let Some(ext) = extension
            && path.extension().and_then(|e| e.to_str()) != Some(ext)
        {
            continue;
        }
        if fs::metadata(&path).map(|m| m.len()).unwrap_or(u64::MAX) > limits.max_file_bytes {
            continue;
        }
        let Ok(bytes) = fs::read(&path) else {
            continue;
        };
        if is_binary(&bytes) {
            continue;
        }
        let content = String::from_utf8_lossy(&bytes);
        let display = display_path(ctx.root(), &path);
        for (idx, line) in content.lines().enumerate() {
            if !re.is_match(line) {
                continue;
            }
            if rows.len() == max_results {
                truncated = true;
                break 'files;
            }
            let text = if looks_like_injection(line) {
                FILTERED_LINE.to_string()
            } else {
                line.trim().chars().take(MAX_ROW_CHARS).collect()
            };
            rows.push(format!("{display}:{}:{text}", idx + 1));
        }
    }
    debug!(pattern, matches = rows.len(), truncated, "searched code");

    if rows.is_empty() {
        return format!("No matches found for '{pattern}'");
    }
    let mut out = format!("🔍 Search results for '{pattern}':\n{RULE}\n");
    for row in &rows {
        out.push_str(row);
        out.push('\n');
    }
    if truncated {
        out.push_str(&format!(
            "... showing first {max_results} matches; narrow the pattern for more\n"
        ));
    }
    out
}

pub(crate) fn find_files(ctx: &ToolContext, args: &Value) -> String {
    let Some(pattern) = arg_str(args, "pattern") else {
        return "Error: missing required argument 'pattern'".to_string();
    };
    let glob = match Pattern::new(pattern) {
        Ok(glob) => glob,
        Err(err) => return format!("Error: invalid glob pattern '{pattern}': {err}"),
    };
    let limits = ctx.limits();
    let max_results = arg_usize(args, "max_results")
        .unwrap_or(limits.max_find_results)
        .clamp(1, limits.max_find_results);
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };
    // A bare pattern like `*.py` matches file names anywhere in the tree.
    let match_name = !pattern.contains('/');

    let mut matches = Vec::new();
    let mut total = 0usize;
    for path in repo_files(ctx.root()) {
        let display = display_path(ctx.root(), &path);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let hit = glob.matches_with(&display, options)
            || (match_name && glob.matches_with(&name, options));
        if !hit {
            continue;
        }
        total += 1;
        if matches.len() < max_results {
            matches.push(display);
        }
    }
    debug!(pattern, total, "found files");

    if matches.is_empty() {
        return format!("No files found matching '{pattern}'");
    }
    let mut out = format!("📁 Files matching '{pattern}':\n");
    for path in &matches {
        out.push_str(path);
        out.push('\n');
    }
    if total > matches.len() {
        out.push_str(&format!("... and {} more\n", total - matches.len()));
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::core::tool_text::search_result_paths;
    use crate::io::config::ToolLimits;
    use crate::io::tools::ToolContext;

    use super::{find_files, search_code};

    fn fixture(limits: ToolLimits) -> (tempfile::TempDir, ToolContext) {
        let temp = tempfile::tempdir().expect("tempdir");
        let files = [
            ("app/main.py", "import os\n\ndef load_config(path):\n    return path\n"),
            ("app/util.py", "def load_config_cached():\n    pass\n"),
            ("web/index.js", "function load_config() {}\n"),
            ("node_modules/dep/index.js", "function load_config() {}\n"),
            (".env", "load_config=secret\n"),
        ];
        for (path, contents) in files {
            let full = temp.path().join(path);
            std::fs::create_dir_all(full.parent().expect("parent")).expect("mkdir");
            std::fs::write(full, contents).expect("write");
        }
        let ctx = ToolContext::new(temp.path(), limits).expect("ctx");
        (temp, ctx)
    }

    #[test]
    fn search_rows_are_path_line_content() {
        let (_temp, ctx) = fixture(ToolLimits::default());
        let out = search_code(&ctx, &json!({"pattern": "def load_config"}));
        assert!(out.starts_with("🔍 Search results for 'def load_config':\n"));
        assert!(out.contains("app/main.py:3:def load_config(path):\n"));
        assert!(out.contains("app/util.py:1:def load_config_cached():\n"));
        assert_eq!(search_result_paths(&out), vec!["app/main.py", "app/util.py"]);
    }

    #[test]
    fn search_skips_ignored_dirs_and_secrets() {
        let (_temp, ctx) = fixture(ToolLimits::default());
        let out = search_code(&ctx, &json!({"pattern": "load_config"}));
        assert!(out.contains("web/index.js:1:"));
        assert!(!out.contains("node_modules"));
        assert!(!out.contains(".env"));
    }

    #[test]
    fn search_filters_by_extension_and_caps_results() {
        let (_temp, ctx) = fixture(ToolLimits::default());
        let out = search_code(&ctx, &json!({"pattern": "load_config", "file_extension": ".js"}));
        assert_eq!(search_result_paths(&out), vec!["web/index.js"]);

        let out = search_code(&ctx, &json!({"pattern": "load_config", "max_results": 1}));
        assert_eq!(search_result_paths(&out).len(), 1);
        assert!(out.contains("... showing first 1 matches"));
    }

    #[test]
    fn search_reports_bad_regex_and_no_matches() {
        let (_temp, ctx) = fixture(ToolLimits::default());
        assert!(search_code(&ctx, &json!({"pattern": "("})).starts_with("Error: invalid regex pattern"));
        assert_eq!(
            search_code(&ctx, &json!({"pattern": "zzz_nothing"})),
            "No matches found for 'zzz_nothing'"
        );
    }

    #[test]
    fn find_matches_names_and_paths() {
        let (_temp, ctx) = fixture(ToolLimits::default());
        let out = find_files(&ctx, &json!({"pattern": "*.py"}));
        assert_eq!(out, "📁 Files matching '*.py':\napp/main.py\napp/util.py\n");

        let out = find_files(&ctx, &json!({"pattern": "web/**/*.js"}));
        assert_eq!(out, "📁 Files matching 'web/**/*.js':\nweb/index.js\n");
    }

    #[test]
    fn find_caps_results() {
        let limits = ToolLimits {
            max_find_results: 1,
            ..ToolLimits::default()
        };
        let (_temp, ctx) = fixture(limits);
        let out = find_files(&ctx, &json!({"pattern": "*.py"}));
        assert_eq!(out, "📁 Files matching '*.py':\napp/main.py\n... and 1 more\n");
    }
}
