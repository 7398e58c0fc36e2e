mod case;
mod category;
mod cli;
mod config;
mod judge;
mod outcome;
mod report;
mod results;
mod run;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::cli::EvalDirs;

#[derive(Parser)]
#[command(name = "scout-eval", version, about = "Evaluation harness for scout")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    List,
    Run {
        case_id: String,
        /// Repository the question is asked about.
        #[arg(long)]
        repo: PathBuf,
        #[arg(long, default_value_t = 1)]
        runs: u32,
    },
    Report {
        case_id: String,
        #[arg(long, default_value_t = 1)]
        k: usize,
    },
    /// Per-category metrics and regressions across all cases.
    Summary,
    Clean {
        case_id: String,
    },
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let dirs = EvalDirs::new(&std::env::current_dir()?);
    match cli.command {
        Command::List => cli::list_cases(&dirs),
        Command::Run {
            case_id,
            repo,
            runs,
        } => cli::run_case_by_id(&dirs, &case_id, &repo, runs),
        Command::Report { case_id, k } => cli::report_case(&dirs, &case_id, k),
        Command::Summary => cli::summarize(&dirs),
        Command::Clean { case_id } => cli::clean_case(&dirs, &case_id),
    }
}
