//! sightline CLI tool
//!
//! Serves the artifact graph over a newline-delimited JSON-RPC stdio transport, and offers a few
//! read-only commands for inspecting a graph database from the shell.
//!
//! ## Commands
//!
//! - `serve`: Answer JSON-RPC requests read from stdin, one per line
//! - `history <snapshot-id>`: Print a snapshot's version chain
//! - `search <query>`: Print entities matching a substring
//! - `open <name>...`: Print entities and their relations
//! - `validations <snapshot-id>` / `diffs <snapshot-id>`: Print aggregated results
//! - `stats`: Print entity and relation counts

use clap::{Parser, Subcommand};
use sightline_core::{
    commands::Op,
    config::ServiceConfig,
    graph::MemoryGraph,
    query::GraphSource,
    service::GraphService,
};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Parser)]
#[command(name = "sightline")]
#[command(author, version, about = "Artifact knowledge graph and lineage engine", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Graph database path (overrides the configuration file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve JSON-RPC requests on stdin/stdout
    Serve {
        /// Keep the graph in memory instead of opening the database
        #[arg(long)]
        memory: bool,
    },

    /// Print the version chain of a snapshot, newest first
    History { snapshot_id: String },

    /// Print entities whose name, type or observations contain the query
    Search { query: String },

    /// Print the named entities and every relation touching them
    Open {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Print the validation results recorded for a snapshot
    Validations { snapshot_id: String },

    /// Print the diffs a snapshot took part in
    Diffs { snapshot_id: String },

    /// Print entity and relation counts
    Stats,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = ServiceConfig::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli.command, config))
}

async fn run(command: Commands, config: ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let op = match command {
        Commands::Serve { memory: true } => {
            tracing::info!("Serving an in-memory graph");
            return serve(GraphService::new(MemoryGraph::new())).await;
        }
        Commands::Serve { memory: false } => {
            tracing::info!("Serving graph database {:?}", config.db_path);
            return serve(GraphService::open(config.db_path).await?).await;
        }
        Commands::Stats => {
            let service = GraphService::open(config.db_path.clone()).await?;
            let (entities, relations) = service.source().counts().await?;
            println!("Database: {}", config.db_path.display());
            println!("  Entities:  {entities}");
            println!("  Relations: {relations}");
            return Ok(());
        }
        Commands::History { snapshot_id } => Op::GetSnapshotHistory(snapshot_id),
        Commands::Search { query } => Op::SearchNodes(query),
        Commands::Open { names } => Op::OpenNodes(names),
        Commands::Validations { snapshot_id } => Op::GetValidationResults(snapshot_id),
        Commands::Diffs { snapshot_id } => Op::GetSnapshotDiffs(snapshot_id),
    };

    let service = GraphService::open(config.db_path).await?;
    let result = service.handle(op).await?;
    println!("{}", serde_json::to_string_pretty(&result.into_value()?)?);
    Ok(())
}

async fn serve<S: GraphSource>(service: GraphService<S>) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        if let Some(response) = service.handle_line(&line).await {
            stdout.write_all(response.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
    }
    tracing::info!("stdin closed, shutting down");
    Ok(())
}
