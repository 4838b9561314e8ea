use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

use shelf::cli::{Cli, Command};

fn main() -> ExitCode {
    if let Err(err) = try_main() {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn try_main() -> anyhow::Result<()> {
    // a missing .env is fine
    let _ = dotenvy::dotenv();
    shelf::logging::init().context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        Command::Serve => {
            let health = shelf::cli::check_store(&cli.settings)?;
            tracing::info!(?health, "catalog store ready");
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(cli.settings.workers.max(1))
                .enable_all()
                .build()
                .context("build runtime")?;
            runtime
                .block_on(shelf::server::serve(cli.settings))
                .context("serve")?;
        }
        Command::Scan => {
            let summary = shelf::cli::scan(&cli.settings)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::InitDb => {
            let report = shelf::cli::init_db(&cli.settings).context("init-db")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
