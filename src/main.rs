//! # Main: CLI Entry Point
//!
//! Routes subcommands to the server and the operator tools in `cli.rs`.
//!
//! ## Subcommands
//!
//! - `serve`: run migrations, start the HTTP API, the outbox drain and the
//!   daily digest scheduler.
//! - `seed-employee`: create (or reset) an active employee so the first
//!   approver exists.
//! - `setup-sheets`: write header rows to every ledger tab.
//! - `digest`: compute the daily lead digest now and mail it (or print it
//!   with `--dry-run`).
//! - `outbox`: show the outbox backlog and recent jobs.
//!
//! ## Global Options
//!
//! - `--database-url` / `DATABASE_URL`: PostgreSQL connection.
//!
//! Everything else comes from the environment (see `config.rs`), with a
//! `.env` file loaded first if present.

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "saltleads", about = "Lead capture backend for CCTV installation sales")]
struct Cli {
    /// PostgreSQL connection URL (or set DATABASE_URL env var)
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        #[arg(long, env = "PORT", default_value_t = 3001)]
        port: u16,
        /// Assume the schema is already current
        #[arg(long)]
        skip_migrations: bool,
    },
    /// Create or reset an active employee account
    SeedEmployee {
        #[arg(long)]
        name: String,
        #[arg(long)]
        username: String,
        /// Read from SEED_PASSWORD if not given
        #[arg(long, env = "SEED_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long, default_value = "")]
        phone: String,
    },
    /// Write header rows to every spreadsheet tab
    SetupSheets,
    /// Send the daily lead digest now
    Digest {
        /// Print the stats as JSON instead of mailing them
        #[arg(long)]
        dry_run: bool,
    },
    /// Show outbox backlog and recent jobs
    Outbox {
        /// pending, in_flight, done or failed
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // LOG_FORMAT=json for log shippers, human-readable otherwise
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").unwrap_or_default() == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();
    let rt = tokio::runtime::Runtime::new()?;

    match &cli.command {
        Commands::Serve {
            port,
            skip_migrations,
        } => rt.block_on(cli::run_serve(&cli, *port, *skip_migrations)),
        Commands::SeedEmployee {
            name,
            username,
            password,
            phone,
        } => rt.block_on(cli::run_seed_employee(&cli, name, username, password, phone)),
        Commands::SetupSheets => rt.block_on(cli::run_setup_sheets()),
        Commands::Digest { dry_run } => rt.block_on(cli::run_digest(*dry_run)),
        Commands::Outbox { status, limit } => {
            rt.block_on(cli::run_outbox(&cli, status.as_deref(), *limit))
        }
    }
}
