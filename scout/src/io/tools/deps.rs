//! `analyze_dependencies`: declared dependencies from root manifests.

use std::fs;

use serde_json::Value;
use tracing::debug;

use crate::io::tools::{RULE, ToolContext};

const MANIFESTS: &[&str] = &[
    "Cargo.toml",
    "package.json",
    "requirements.txt",
    "pyproject.toml",
    "go.mod",
];
const MAX_PER_GROUP: usize = 40;

#[derive(Debug, Default, PartialEq)]
struct Manifest {
    runtime: Vec<String>,
    dev: Vec<String>,
}

pub(crate) fn analyze_dependencies(ctx: &ToolContext, _args: &Value) -> String {
    let mut sections = Vec::new();
    for name in MANIFESTS {
        let path = ctx.root().join(name);
        if !path.is_file() {
            continue;
        }
        let Ok(contents) = fs::read_to_string(&path) else {
            continue;
        };
        let parsed = match *name {
            "Cargo.toml" => parse_cargo(&contents),
            "package.json" => parse_package_json(&contents),
            "requirements.txt" => Ok(parse_requirements(&contents)),
            "pyproject.toml" => parse_pyproject(&contents),
            _ => Ok(parse_go_mod(&contents)),
        };
        match parsed {
            Ok(manifest) => sections.push(render_section(name, &manifest)),
            Err(err) => sections.push(format!("## {name}\nError: could not parse: {err}\n")),
        }
    }
    debug!(manifests = sections.len(), "analyzed dependencies");

    if sections.is_empty() {
        return format!(
            "No dependency manifests found (looked for {})",
            MANIFESTS.join(", ")
        );
    }
    format!("📦 Dependencies\n{RULE}\n\n{}", sections.join("\n"))
}

fn render_section(name: &str, manifest: &Manifest) -> String {
    let mut out = format!("## {name}\n");
    for (label, deps) in [("Runtime", &manifest.runtime), ("Dev", &manifest.dev)] {
        if deps.is_empty() {
            continue;
        }
        out.push_str(&format!("{label} ({}):\n", deps.len()));
        for dep in deps.iter().take(MAX_PER_GROUP) {
            out.push_str(&format!("- {dep}\n"));
        }
        if deps.len() > MAX_PER_GROUP {
            out.push_str(&format!("- ... and {} more\n", deps.len() - MAX_PER_GROUP));
        }
    }
    if manifest.runtime.is_empty() && manifest.dev.is_empty() {
        out.push_str("(no dependencies declared)\n");
    }
    out
}

fn toml_table_deps(table: Option<&toml::Value>) -> Vec<String> {
    let Some(table) = table.and_then(toml::Value::as_table) else {
        return Vec::new();
    };
    table
        .iter()
        .map(|(name, spec)| {
            let version = match spec {
                toml::Value::String(v) => Some(v.as_str()),
                toml::Value::Table(t) => t.get("version").and_then(toml::Value::as_str),
                _ => None,
            };
            match version {
                Some(v) => format!("{name} {v}"),
                None => name.clone(),
            }
        })
        .collect()
}

fn parse_cargo(contents: &str) -> Result<Manifest, String> {
    let doc: toml::Table = toml::from_str(contents).map_err(|err| err.to_string())?;
    let mut runtime = toml_table_deps(doc.get("dependencies"));
    runtime.extend(toml_table_deps(
        doc.get("workspace").and_then(|w| w.get("dependencies")),
    ));
    let dev = toml_table_deps(doc.get("dev-dependencies"));
    Ok(Manifest { runtime, dev })
}

fn json_deps(doc: &Value, key: &str) -> Vec<String> {
    doc.get(key)
        .and_then(Value::as_object)
        .map(|deps| {
            deps.iter()
                .map(|(name, version)| match version.as_str() {
                    Some(v) => format!("{name} {v}"),
                    None => name.clone(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_package_json(contents: &str) -> Result<Manifest, String> {
    let doc: Value = serde_json::from_str(contents).map_err(|err| err.to_string())?;
    Ok(Manifest {
        runtime: json_deps(&doc, "dependencies"),
        dev: json_deps(&doc, "devDependencies"),
    })
}

fn parse_requirements(contents: &str) -> Manifest {
    let runtime = contents
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty() && !line.starts_with('-'))
        .map(str::to_string)
        .collect();
    Manifest {
        runtime,
        dev: Vec::new(),
    }
}

fn parse_pyproject(contents: &str) -> Result<Manifest, String> {
    let doc: toml::Table = toml::from_str(contents).map_err(|err| err.to_string())?;
    let mut runtime: Vec<String> = doc
        .get("project")
        .and_then(|p| p.get("dependencies"))
        .and_then(toml::Value::as_array)
        .map(|deps| {
            deps.iter()
                .filter_map(toml::Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let poetry = doc.get("tool").and_then(|t| t.get("poetry"));
    runtime.extend(
        toml_table_deps(poetry.and_then(|p| p.get("dependencies")))
            .into_iter()
            .filter(|dep| !dep.starts_with("python ") && dep != "python"),
    );
    let dev = toml_table_deps(poetry.and_then(|p| p.get("dev-dependencies")));
    Ok(Manifest { runtime, dev })
}

fn parse_go_mod(contents: &str) -> Manifest {
    let mut runtime = Vec::new();
    let mut in_block = false;
    for line in contents.lines() {
        let line = line.split("//").next().unwrap_or_default().trim();
        if in_block {
            if line == ")" {
                in_block = false;
            } else if !line.is_empty() {
                runtime.push(line.to_string());
            }
        } else if line == "require (" {
            in_block = true;
        } else if let Some(single) = line.strip_prefix("require ") {
            runtime.push(single.trim().to_string());
        }
    }
    Manifest {
        runtime,
        dev: Vec::new(),
    }
}
