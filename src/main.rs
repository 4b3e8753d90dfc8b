//! sts - summarize a parsed Java repository tree and retrieve methods from
//! it by natural-language description.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use summary_tree_search::{RepoTree, RetrievalResult, STS};

/// LLM-guided method retrieval over a summarized repository tree
#[derive(Parser)]
#[command(name = "sts")]
#[command(about = "LLM-guided method retrieval over a summarized repository tree")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize a parsed repository tree bottom-up
    Summarize {
        /// Parser output JSON (the un-summarized tree)
        input: PathBuf,

        /// Where to write the summarized tree
        #[arg(long, short)]
        output: PathBuf,
    },

    /// Retrieve one method by its description
    Retrieve {
        /// Summarized tree JSON
        tree: PathBuf,

        /// Natural-language description of the method
        query: String,
    },

    /// Run a JSONL file of queries against one summarized tree
    Batch {
        /// Summarized tree JSON
        tree: PathBuf,

        /// JSONL file of {"query", "func_name", "path"} records
        queries: PathBuf,

        /// Where to write JSONL results
        #[arg(long, short)]
        output: PathBuf,

        /// Stop at the first retrieval that errors
        #[arg(long)]
        stop_on_error: bool,
    },
}

/// One line of the batch input: a query plus the ground-truth location.
#[derive(Debug, Deserialize)]
struct BatchRecord {
    query: String,
    func_name: String,
    path: Vec<String>,
}

/// One line of the batch output.
#[derive(Debug, Serialize)]
struct BatchOutcome {
    query: String,
    func_name: String,
    expected_path: Vec<String>,
    result: RetrievalResult,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Summarize { input, output } => {
            let sts = STS::from_env()?;
            let mut repo = RepoTree::load(&input)?;

            eprintln!("[sts] Summarizing {} nodes...", repo.node_count);
            let stats = sts.summarize(&mut repo).await;

            repo.save(&output)?;
            eprintln!(
                "[sts] Summarized {} nodes ({} without context, {} failed), {} tokens",
                stats.summarized, stats.no_context, stats.failed, stats.token_used
            );
        }

        Commands::Retrieve { tree, query } => {
            let sts = STS::from_env()?;
            let repo = RepoTree::load(&tree)?;

            let result = sts.retrieve(&query, &repo).await;
            println!(
                "{}",
                serde_json::to_string_pretty(&result).context("Failed to serialize result")?
            );
        }

        Commands::Batch {
            tree,
            queries,
            output,
            stop_on_error,
        } => {
            let sts = STS::from_env()?;
            let repo = RepoTree::load(&tree)?;

            let input = File::open(&queries)
                .with_context(|| format!("Failed to open query file {}", queries.display()))?;
            let out = File::create(&output)
                .with_context(|| format!("Failed to create output file {}", output.display()))?;
            let mut writer = BufWriter::new(out);

            let mut found = 0usize;
            let mut errors = 0usize;
            let mut total = 0usize;

            for (line_no, line) in BufReader::new(input).lines().enumerate() {
                let line = line.context("Failed to read query file")?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: BatchRecord = serde_json::from_str(&line)
                    .with_context(|| format!("Bad query record on line {}", line_no + 1))?;

                total += 1;
                eprintln!("[sts] [{}] {}", total, record.query);

                let result = sts.retrieve(&record.query, &repo).await;
                let is_error = result.error;
                if result.found {
                    found += 1;
                }
                if is_error {
                    errors += 1;
                }

                let outcome = BatchOutcome {
                    query: record.query,
                    func_name: record.func_name,
                    expected_path: record.path,
                    result,
                };
                serde_json::to_writer(&mut writer, &outcome)
                    .context("Failed to write result record")?;
                writeln!(writer).context("Failed to write result record")?;

                if is_error && stop_on_error {
                    eprintln!("[sts] Retrieval error, stopping");
                    break;
                }
            }
            writer.flush().context("Failed to flush results")?;

            eprintln!(
                "[sts] Done: {} queries, {} found, {} errors",
                total, found, errors
            );
        }
    }

    Ok(())
}
