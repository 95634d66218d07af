//! oxide-sync CLI
//!
//! Command-line tool for synchronizing a SQLite database with a schema file.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::ConnectOptions;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use oxide_sync::prelude::*;

/// Declarative schema synchronization for SQLite.
#[derive(Parser)]
#[command(name = "oxide-sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (SQLite path or connection string).
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:db.sqlite3")]
    database: String,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize the database with a schema file.
    Apply {
        /// File holding the target schema as SQL DDL.
        schema: PathBuf,

        /// Keep the current journal mode and synchronous setting.
        #[arg(long)]
        no_durability: bool,
    },

    /// Show what would change without touching the database.
    Plan {
        /// File holding the target schema as SQL DDL.
        schema: PathBuf,

        /// Print the plan as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Run the foreign-key and integrity checks.
    Check,
}

fn read_schema(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read schema file {}", path.display()))
}

fn print_plan(plan: &SyncPlan) {
    println!("\nPlanned changes:");
    println!("{:-<60}", "");
    for kind_diff in &plan.diffs {
        for object in &kind_diff.create {
            println!(" + {} {}", kind_diff.kind, object.name);
        }
        for object in &kind_diff.update {
            println!(" ~ {} {}", kind_diff.kind, object.name);
        }
        for object in &kind_diff.extraneous {
            println!(" - {} {}", kind_diff.kind, object.name);
        }
    }
    println!();
}

fn print_report(report: &SyncReport) {
    println!(
        "\n{:<10} {:>8} {:>8} {:>8} {:>10}",
        "kind", "created", "updated", "dropped", "unchanged"
    );
    println!("{:-<48}", "");
    for (kind, counts) in &report.counts {
        println!(
            "{:<10} {:>8} {:>8} {:>8} {:>10}",
            kind.as_str(),
            counts.created,
            counts.updated,
            counts.dropped,
            counts.unchanged
        );
    }
    println!();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Connect to database
    let mut conn: SqliteConnection = SqliteConnectOptions::from_str(&cli.database)?
        .create_if_missing(true)
        .connect()
        .await
        .with_context(|| format!("Failed to open {}", cli.database))?;

    match cli.command {
        Commands::Apply {
            schema,
            no_durability,
        } => {
            let text = read_schema(&schema)?;
            let sync = Synchronizer::new(SyncOptions::new().durability(!no_durability));
            let report = sync.synchronize(&mut conn, &text).await?;

            if report.is_noop() {
                info!("Database already matches {}.", schema.display());
            } else {
                info!(
                    "Applied {} statements from {}.",
                    report.statements.len(),
                    schema.display()
                );
                print_report(&report);
            }
        }

        Commands::Plan { schema, json } => {
            let text = read_schema(&schema)?;
            let plan = Synchronizer::default().plan(&mut conn, &text).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else if plan.is_empty() {
                info!("Database already matches {}.", schema.display());
            } else {
                print_plan(&plan);
            }
        }

        Commands::Check => {
            verify_integrity(&mut conn).await?;
            info!("Integrity check passed.");
        }
    }

    Ok(())
}
