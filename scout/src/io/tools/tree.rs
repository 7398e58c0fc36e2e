//! `list_directory_structure`: an indented tree of the repository.

use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::io::tools::security::{display_path, is_ignored_dir, is_sensitive, resolve_in_repo};
use crate::io::tools::{ToolContext, arg_str, arg_usize};

const MAX_ENTRIES: usize = 400;

pub(crate) fn list_directory(ctx: &ToolContext, args: &Value) -> String {
    let limits = ctx.limits();
    let max_depth = arg_usize(args, "max_depth")
        .unwrap_or(limits.max_tree_depth)
        .clamp(1, limits.max_tree_depth);
    let dir = match arg_str(args, "path").map(str::trim) {
        None | Some("" | "." | "./") => ctx.root().to_path_buf(),
        Some(requested) => match resolve_in_repo(ctx.root(), requested) {
            Ok(path) => path,
            Err(message) => return message,
        },
    };
    if !dir.is_dir() {
        return format!("Error: '{}' is not a directory", display_path(ctx.root(), &dir));
    }

    let label = if dir == ctx.root() {
        ".".to_string()
    } else {
        display_path(ctx.root(), &dir)
    };
    let mut walk = TreeWalk {
        root: ctx.root(),
        max_depth,
        lines: vec![format!("{label}/")],
        entries: 0,
        omitted: 0,
    };
    walk.visit(&dir, "", 1);
    if walk.omitted > 0 {
        walk.lines
            .push(format!("... {} more entries not shown", walk.omitted));
    }
    debug!(dir = %label, entries = walk.entries, "listed directory");
    let mut out = walk.lines.join("\n");
    out.push('\n');
    out
}

struct TreeWalk<'a> {
    root: &'a Path,
    max_depth: usize,
    lines: Vec<String>,
    entries: usize,
    omitted: usize,
}

impl TreeWalk<'_> {
    fn visit(&mut self, dir: &Path, prefix: &str, depth: usize) {
        let Ok(read) = fs::read_dir(dir) else {
            return;
        };
        let mut children: Vec<(String, bool)> = read
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                let is_dir = entry.file_type().ok()?.is_dir();
                if is_dir && is_ignored_dir(&name) {
                    return None;
                }
                let relative = entry.path();
                let relative = relative.strip_prefix(self.root).unwrap_or(&relative);
                if !is_dir && is_sensitive(relative) {
                    return None;
                }
                Some((name, is_dir))
            })
            .collect();
        children.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let count = children.len();
        for (idx, (name, is_dir)) in children.into_iter().enumerate() {
            if self.entries == MAX_ENTRIES {
                self.omitted += 1;
                continue;
            }
            self.entries += 1;
            let last = idx + 1 == count;
            let branch = if last { "└── " } else { "├── " };
            let suffix = if is_dir { "/" } else { "" };
            self.lines.push(format!("{prefix}{branch}{name}{suffix}"));
            if is_dir && depth < self.max_depth {
                let child_prefix = format!("{prefix}{}", if last { "    " } else { "│   " });
                self.visit(&dir.join(&name), &child_prefix, depth + 1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::io::config::ToolLimits;
    use crate::io::tools::ToolContext;

    use super::list_directory;

    fn fixture() -> (tempfile::TempDir, ToolContext) {
        let temp = tempfile::tempdir().expect("tempdir");
        for path in [
            "README.md",
            "src/main.rs",
            "src/net/client.rs",
            "src/net/deep/more.rs",
            "target/debug/out",
            ".env",
        ] {
            let full = temp.path().join(path);
            std::fs::create_dir_all(full.parent().expect("parent")).expect("mkdir");
            std::fs::write(full, "x").expect("write");
        }
        let ctx = ToolContext::new(temp.path(), ToolLimits::default()).expect("ctx");
        (temp, ctx)
    }

    #[test]
    fn renders_tree_with_dirs_first() {
        let (_temp, ctx) = fixture();
        let out = list_directory(&ctx, &json!({"max_depth": 2}));
        assert_eq!(
            out,
            "./\n├── src/\n│   ├── net/\n│   └── main.rs\n└── README.md\n"
        );
    }

    #[test]
    fn depth_is_capped_by_limits() {
        let (_temp, ctx) = fixture();
        let out = list_directory(&ctx, &json!({"max_depth": 99}));
        assert!(out.contains("client.rs"));
        assert!(out.contains("deep/"));
        assert!(!out.contains("more.rs"));
    }

    #[test]
    fn subdirectory_listing_and_errors() {
        let (_temp, ctx) = fixture();
        let out = list_directory(&ctx, &json!({"path": "src/net"}));
        assert!(out.starts_with("src/net/\n"));
        assert!(out.contains("└── client.rs"));
        assert_eq!(
            list_directory(&ctx, &json!({"path": "README.md"})),
            "Error: 'README.md' is not a directory"
        );
    }
}
