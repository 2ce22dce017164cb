//! # CLI Execution Functions
//!
//! Extracted from `main.rs` to keep the entry point slim. One function per
//! subcommand; each builds only the pieces it needs (database, sinks).

use anyhow::{Context, Result};
use saltleads::config::Config;
use saltleads::ledger::Ledger;
use saltleads::{auth, dashboard, db, digest, ledger};
use tracing::info;

use super::Cli;

fn database_url(cli: &Cli) -> Result<&str> {
    cli.database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required (set via --database-url or env)"))
}

async fn connect(cli: &Cli) -> Result<db::Database> {
    db::Database::connect(database_url(cli)?).await
}

pub async fn run_serve(cli: &Cli, port: u16, skip_migrations: bool) -> Result<()> {
    let config = Config::from_env()?;
    let database = connect(cli).await?;
    if skip_migrations {
        info!("skipping migrations");
    } else {
        database.migrate().await.context("running migrations")?;
    }
    dashboard::run(port, database, config).await
}

pub async fn run_seed_employee(
    cli: &Cli,
    name: &str,
    username: &str,
    password: &str,
    phone: &str,
) -> Result<()> {
    anyhow::ensure!(
        username.trim().chars().count() >= auth::MIN_USERNAME_LEN,
        "username must be at least {} characters",
        auth::MIN_USERNAME_LEN
    );
    anyhow::ensure!(
        password.chars().count() >= auth::MIN_PASSWORD_LEN,
        "password must be at least {} characters",
        auth::MIN_PASSWORD_LEN
    );
    let database = connect(cli).await?;
    database.migrate().await?;
    let hash = auth::hash_password(password)?;
    let user = database
        .upsert_active_employee(name.trim(), username, &hash, phone.trim())
        .await?;
    info!(username = %user.username, id = %user.id, "employee ready");
    eprintln!("Employee '{}' is active.", user.username);
    Ok(())
}

pub async fn run_setup_sheets() -> Result<()> {
    let config = Config::from_env()?;
    anyhow::ensure!(
        config.sheets.is_some(),
        "GOOGLE_SPREADSHEET_ID and GOOGLE_CREDENTIALS (or GOOGLE_ACCESS_TOKEN) are required"
    );
    let (ledger, _) = dashboard::build_sinks(&config)?;
    ledger::setup_headers(ledger.as_ref()).await?;
    eprintln!("Header rows written to all tabs.");
    Ok(())
}

pub async fn run_digest(dry_run: bool) -> Result<()> {
    let config = Config::from_env()?;
    let (ledger, notifier) = dashboard::build_sinks(&config)?;
    let stats = if dry_run {
        let salt = ledger.read_rows(ledger::Sheet::Salt).await?;
        let kt = ledger.read_rows(ledger::Sheet::Kt).await?;
        digest::compute_stats(&salt, &kt, chrono::Utc::now())
    } else {
        digest::send_digest(ledger.as_ref(), notifier.as_ref()).await?
    };
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

pub async fn run_outbox(cli: &Cli, status: Option<&str>, limit: i64) -> Result<()> {
    let database = connect(cli).await?;
    let summary = database.outbox_summary().await?;
    println!(
        "pending: {}  in_flight: {}  failed: {}",
        summary.pending, summary.in_flight, summary.failed
    );
    for job in database.list_jobs(status, limit.max(1)).await? {
        println!(
            "#{:<6} {:<16} {:<9} attempts={} next={} {}",
            job.id,
            job.kind,
            job.status,
            job.attempts,
            job.next_attempt_at.format("%Y-%m-%d %H:%M:%S"),
            job.last_error.unwrap_or_default()
        );
    }
    Ok(())
}
