use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::config::Settings;
use crate::db::{self, StoreHealth};
use crate::parser::LopdfPageCounter;
use crate::scanner::{self, ScanSummary};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub settings: Settings,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check the catalog store, then serve the web API.
    Serve,
    /// Scan the PDF root once and print the summary as JSON.
    Scan,
    /// Create or migrate the catalog database.
    InitDb,
}

#[derive(Debug, Serialize)]
pub struct InitReport {
    pub db_path: String,
    pub store: StoreHealth,
}

/// Opens the catalog and clears a stale lock left by a crashed writer.
pub fn check_store(settings: &Settings) -> anyhow::Result<StoreHealth> {
    let conn = db::open(&settings.db_path)
        .with_context(|| format!("open catalog {}", settings.db_path.display()))?;
    let health = db::probe_and_heal(&conn).context("probe catalog store")?;
    Ok(health)
}

pub fn init_db(settings: &Settings) -> anyhow::Result<InitReport> {
    let store = check_store(settings)?;
    Ok(InitReport {
        db_path: settings.db_path.display().to_string(),
        store,
    })
}

pub fn scan(settings: &Settings) -> anyhow::Result<ScanSummary> {
    check_store(settings)?;
    let root = settings.pdf_root().context("resolve pdf root")?;
    let mut conn = db::open(&settings.db_path)
        .with_context(|| format!("open catalog {}", settings.db_path.display()))?;
    let summary = scanner::scan_library(&mut conn, root, &settings.scan_options(), &LopdfPageCounter)
        .context("scan library")?;
    Ok(summary)
}
