//! # FilingLens CLI (`flens`)
//!
//! The `flens` binary is the primary interface for FilingLens. It
//! provides commands for database initialization, one-shot company
//! analysis, index statistics, resetting the index, and starting the
//! HTTP analysis server.
//!
//! ## Usage
//!
//! ```bash
//! flens --config ./config/flens.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `flens init` | Create the SQLite database and run schema migrations |
//! | `flens ask <company> <question>` | Run one analysis session and print the answer |
//! | `flens stats` | Show index statistics |
//! | `flens reset` | Clear the catalog and vector index |
//! | `flens serve` | Start the HTTP analysis server |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! flens init --config ./config/flens.toml
//!
//! # Ask a question about a company
//! flens ask "Acme Corp" "How did operating margin develop?"
//!
//! # Widen the filing search window
//! flens ask "Acme Corp" "Long-term capex trend?" --lookback-years 7
//!
//! # Start the HTTP server
//! flens serve --config ./config/flens.toml
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use filinglens::session::{run_analysis, Services, SessionOptions, StatusSender};
use filinglens::models::StatusEvent;
use filinglens::{catalog, config, migrate, server, stats};

/// FilingLens CLI — company analysis over filings and research reports.
///
/// All commands accept a `--config` flag pointing to a TOML
/// configuration file. See `config/flens.example.toml` for a full
/// example.
#[derive(Parser)]
#[command(
    name = "flens",
    about = "FilingLens — company analysis over corporate filings and brokerage research",
    version,
    long_about = "FilingLens resolves a company against a filings registry, acquires the most \
    relevant filing plus supplementary brokerage reports, indexes everything into a local \
    SQLite vector index, and answers questions with retrieved evidence via a CLI and an \
    HTTP server."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/flens.toml`. Registry, brokerage,
    /// embedding, LLM, and server settings are read from this file.
    #[arg(long, global = true, default_value = "./config/flens.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (documents, chunk_vectors). This command is idempotent —
    /// running it multiple times is safe.
    Init,

    /// Run one analysis session and print the answer.
    ///
    /// Resolves the company, acquires its most relevant filing and
    /// supplementary brokerage reports, and answers the question from
    /// the indexed evidence. Stage progress is printed as it happens.
    Ask {
        /// Company name as the user knows it (need not be the
        /// registered name).
        company: String,

        /// The question to answer.
        question: String,

        /// Override the inferred filing search window, in years (1-10).
        #[arg(long)]
        lookback_years: Option<i64>,
    },

    /// Show index statistics.
    ///
    /// Prints document, chunk, and company counts plus a per-source
    /// breakdown.
    Stats,

    /// Clear the catalog and vector index.
    ///
    /// Deletes every indexed document and its chunk vectors. The
    /// schema is left in place.
    Reset {
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },

    /// Start the HTTP analysis server.
    ///
    /// Binds to the address configured in `[server].bind` and exposes
    /// session, stats, and reset endpoints.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ask {
            company,
            question,
            lookback_years,
        } => {
            let services = Services::from_config(cfg).await?;
            let opts = SessionOptions { lookback_years };

            let (tx, mut rx) = tokio::sync::mpsc::channel::<StatusEvent>(64);
            let printer = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    println!("[{}] {}", event.stage, event.message);
                }
            });

            let status = StatusSender::new(tx);
            let result = run_analysis(&services, &company, &question, &opts, &status).await;
            drop(status);
            let _ = printer.await;

            println!();
            if let Some(answer) = &result.answer {
                println!("{}", answer);
            }
            if !result.company_reports.is_empty() {
                println!();
                println!("Company reports consulted:");
                for r in &result.company_reports {
                    println!("  - {} ({})", r.title, r.published_date);
                }
            }
            if !result.industry_reports.is_empty() {
                println!();
                println!("Industry reports consulted:");
                for r in &result.industry_reports {
                    println!("  - {} ({})", r.title, r.published_date);
                }
            }
            if !result.success {
                let message = result
                    .error
                    .unwrap_or_else(|| "analysis failed".to_string());
                anyhow::bail!(message);
            }
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Reset { yes } => {
            if !yes {
                println!(
                    "This deletes every indexed document in {}. Re-run with --yes to confirm.",
                    cfg.storage.db_path.display()
                );
                return Ok(());
            }
            let store = catalog::Store::open(&cfg).await?;
            store.reset().await?;
            println!("Index cleared.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
