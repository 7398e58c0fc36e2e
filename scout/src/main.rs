//! Grounded code exploration from the command line.
//!
//! Asks a reasoning engine about a repository, lets it explore with read-only
//! tools, and prints the answer after every citation has been verified.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use scout::assistant::Assistant;
use scout::core::filter::filter_reported;
use scout::core::grounding::{GroundingReport, VerificationPolicy, verify_answer};
use scout::exit_codes;
use scout::io::cache::{ResponseCache, repo_state_hash};
use scout::io::config::{ScoutConfig, ScoutPaths, load_config, write_config};
use scout::io::engine::HttpEngine;
use scout::logging::init_logging;
use scout::turn::{TurnEvent, TurnOutcome, TurnPhase};

#[derive(Parser)]
#[command(
    name = "scout",
    version,
    about = "Ask questions about a codebase and get verified, cited answers"
)]
struct Cli {
    /// Repository to explore.
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,
    /// Config file. Defaults to `<repo>/.scout/config.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer one question.
    Ask {
        question: String,
        /// Skip the response cache.
        #[arg(long)]
        no_cache: bool,
        /// Print tokens as they arrive.
        #[arg(long)]
        stream: bool,
    },
    /// Summarize the repository.
    Overview {
        #[arg(long)]
        no_cache: bool,
    },
    /// Interactive session. `/reset`, `/stats`, `/quit`.
    Chat,
    /// Check an answer against saved tool outputs, without an engine.
    Verify {
        /// File holding the answer text.
        #[arg(long)]
        answer: PathBuf,
        /// Files holding tool outputs (read_file results).
        #[arg(long, num_args = 1.., required = true)]
        outputs: Vec<PathBuf>,
        /// Accept a cited line within a read file's length even if not shown.
        #[arg(long)]
        soft: bool,
    },
    /// Inspect or prune the response cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Write `.scout/config.toml` with defaults.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand, Clone, Copy)]
enum CacheAction {
    Stats,
    Clear,
    /// Remove entries recorded for other repository states.
    Invalidate,
}

fn main() {
    init_logging();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(exit_codes::ERROR);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let paths = ScoutPaths::new(&cli.repo);
    let config_path = cli.config.clone().unwrap_or_else(|| paths.config_path.clone());
    match cli.command {
        Command::Init { force } => cmd_init(&config_path, force),
        Command::Verify {
            answer,
            outputs,
            soft,
        } => cmd_verify(&answer, &outputs, soft),
        Command::Cache { action } => {
            let cfg = load_config(&config_path)?;
            cmd_cache(&cli.repo, &paths, &cfg, action)
        }
        Command::Ask {
            question,
            no_cache,
            stream,
        } => {
            let mut assistant = open_assistant(&cli.repo, &config_path)?;
            if stream {
                cmd_ask_streaming(&mut assistant, &question, !no_cache)
            } else {
                let outcome = assistant.ask_with(&question, !no_cache, print_progress)?;
                Ok(print_outcome(&outcome))
            }
        }
        Command::Overview { no_cache } => {
            let mut assistant = open_assistant(&cli.repo, &config_path)?;
            let outcome = assistant.overview(!no_cache)?;
            Ok(print_outcome(&outcome))
        }
        Command::Chat => {
            let mut assistant = open_assistant(&cli.repo, &config_path)?;
            cmd_chat(&mut assistant)
        }
    }
}

fn open_assistant(repo: &Path, config_path: &Path) -> Result<Assistant<HttpEngine>> {
    let cfg = load_config(config_path)?;
    let engine = HttpEngine::from_config(&cfg.engine)?;
    Assistant::new(repo, cfg, engine)
}

fn print_progress(event: &TurnEvent) {
    if let TurnEvent::ToolStart { status, .. } = event {
        eprintln!("  → {status}");
    }
}

fn print_outcome(outcome: &TurnOutcome) -> i32 {
    println!("{}", outcome.answer);
    if outcome.cached {
        eprintln!("(cached)");
    }
    match outcome.phase {
        TurnPhase::Aborted => exit_codes::ABORTED,
        _ => exit_codes::OK,
    }
}

fn cmd_ask_streaming(
    assistant: &mut Assistant<HttpEngine>,
    question: &str,
    use_cache: bool,
) -> Result<i32> {
    let mut streamed = String::new();
    let mut code = exit_codes::OK;
    let mut stdout = io::stdout();
    for event in assistant.stream_ask(question, use_cache)? {
        match event {
            TurnEvent::Token(chunk) => {
                streamed.push_str(&chunk);
                print!("{chunk}");
                stdout.flush().context("flush stdout")?;
            }
            TurnEvent::ToolStart { status, .. } => eprintln!("  → {status}"),
            TurnEvent::ToolEnd { .. } => {}
            TurnEvent::Error(message) => eprintln!("{message}"),
            TurnEvent::Done { answer, phase } => {
                if phase == TurnPhase::Aborted {
                    code = exit_codes::ABORTED;
                    if !answer.starts_with("**Error:**") {
                        println!("{answer}");
                    }
                } else if answer != streamed {
                    println!("\n\n--- verified answer ---\n{answer}");
                } else {
                    println!();
                }
            }
        }
    }
    Ok(code)
}

fn cmd_chat(assistant: &mut Assistant<HttpEngine>) -> Result<i32> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("> ");
        stdout.flush().context("flush stdout")?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line).context("read stdin")? == 0 {
            return Ok(exit_codes::OK);
        }
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => return Ok(exit_codes::OK),
            "/reset" => {
                assistant.reset();
                println!("Session reset.");
            }
            "/stats" => {
                let stats = serde_json::to_string_pretty(&assistant.stats())
                    .context("serialize stats")?;
                println!("{stats}");
            }
            message => {
                let outcome = assistant.chat(message, print_progress)?;
                println!("{}\n", outcome.answer);
            }
        }
    }
}

#[derive(Serialize)]
struct VerifyReport<'a> {
    report: &'a GroundingReport,
    removed_citations: usize,
    answer: &'a str,
}

fn cmd_verify(answer_path: &Path, output_paths: &[PathBuf], soft: bool) -> Result<i32> {
    let answer = fs::read_to_string(answer_path)
        .with_context(|| format!("read {}", answer_path.display()))?;
    let outputs = output_paths
        .iter()
        .map(|path| fs::read_to_string(path).with_context(|| format!("read {}", path.display())))
        .collect::<Result<Vec<String>>>()?;
    let policy = if soft {
        VerificationPolicy::Soft
    } else {
        VerificationPolicy::Strict
    };
    let refs: Vec<&str> = outputs.iter().map(String::as_str).collect();
    let report = verify_answer(&answer, &refs, policy);
    let filtered = filter_reported(&answer, &report, true);
    let payload = serde_json::to_string_pretty(&VerifyReport {
        report: &report,
        removed_citations: filtered.removed,
        answer: &filtered.text,
    })
    .context("serialize report")?;
    println!("{payload}");
    Ok(exit_codes::OK)
}

fn cmd_cache(repo: &Path, paths: &ScoutPaths, cfg: &ScoutConfig, action: CacheAction) -> Result<i32> {
    let cache = ResponseCache::new(paths.cache_dir_for(&cfg.cache), cfg.cache.max_age_days);
    match action {
        CacheAction::Stats => {
            let stats = serde_json::to_string_pretty(&cache.stats()?).context("serialize stats")?;
            println!("{stats}");
        }
        CacheAction::Clear => {
            let removed = cache.clear()?;
            println!("Removed {removed} cache entries from {}", cache.dir().display());
        }
        CacheAction::Invalidate => {
            let removed = cache.invalidate_stale(&repo_state_hash(repo))?;
            println!("Removed {removed} stale cache entries");
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        println!("{} already exists (use --force to overwrite)", config_path.display());
        return Ok(exit_codes::OK);
    }
    write_config(config_path, &ScoutConfig::default())?;
    println!("Wrote {}", config_path.display());
    Ok(exit_codes::OK)
}
