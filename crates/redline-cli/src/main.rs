//! Command-line runner for Redline pipelines
//!
//! Usage:
//!   redline run `<graph.json>` --document `<file>` [--config `<engine.json>`] [--start `<node>`] [--output `<file>`]
//!   redline order `<graph.json>` [--start `<node>`]
//!   redline chunk `<file>` [--max-tokens `<n>`]

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "redline", version, about = "Run document-processing pipelines against a transform service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Execute a pipeline graph over a document
    Run {
        /// Pipeline graph (nodes and edges, camelCase JSON)
        graph: PathBuf,
        /// Plain-text document fed to the document-input node
        #[arg(long, short = 'd')]
        document: PathBuf,
        /// Engine configuration; defaults apply when omitted
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
        /// Node to start from instead of the first document input
        #[arg(long, short = 's')]
        start: Option<String>,
        /// Write every node's result here instead of printing endpoints
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Print the streamed display document of this node when the run ends
        #[arg(long)]
        follow: Option<String>,
    },
    /// Print the execution order of a graph
    Order {
        graph: PathBuf,
        #[arg(long, short = 's')]
        start: Option<String>,
    },
    /// Show how a document would be chunked
    Chunk {
        file: PathBuf,
        #[arg(long)]
        max_tokens: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run {
            graph,
            document,
            config,
            start,
            output,
            follow,
        } => {
            let options = commands::RunOptions {
                graph,
                document,
                config,
                start,
                output,
                follow,
            };
            commands::run(options).await
        }
        Command::Order { graph, start } => commands::order(&graph, start.as_deref()).await,
        Command::Chunk { file, max_tokens } => commands::chunk(&file, max_tokens).await,
    };

    match result {
        Ok(text) => {
            if !text.is_empty() {
                println!("{}", text);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
