//! peerstake: stake-backed paper verification from the command line.
//!
//! Every command prints the JSON response envelope on stdout; logs go to
//! stderr. The exit status is non-zero when the envelope carries an error.

mod backend;
mod commands;
mod config;
mod demo;

use clap::Parser;
use tracing::{debug, error, warn};

use governance::config::MetastoreBackend;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::Commands;
use config::Args;
use ledger::Address;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                let level = &args.log_level;
                format!("peerstake={level},governance={level},ledger={level},metastore={level},warn").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match args.governance_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            std::process::exit(2);
        }
    };
    debug!(rpc_url = %config.ledger.rpc_url, backend = ?config.metastore.backend, "Configuration loaded");

    let ok = if matches!(args.command, Commands::Demo) {
        demo::run(&config).await?
    } else {
        let caller = if args.command.needs_caller() {
            args.require_caller()?
        } else {
            args.caller.clone().unwrap_or_else(Address::zero)
        };
        if config.metastore.backend == MetastoreBackend::Memory && args.command.reads_stored_records() {
            warn!("The memory metastore does not outlive this process; use --metastore mongo to see earlier requests");
        }
        let service = backend::service(&config).await?;
        let command = args.command.into_command(&service).await?;
        let envelope = service.dispatch(&caller, command).await;
        println!("{}", serde_json::to_string_pretty(&envelope)?);
        envelope.ok
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
