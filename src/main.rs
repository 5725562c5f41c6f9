mod client;
mod config;
mod diagnostics;
mod error;
mod host;
mod logging;
mod sync;

#[cfg(test)]
mod testing;

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};

use client::frappe::FrappeClient;
use client::iclock::IclockClient;
use config::{JsonFileStore, Settings};
use error::AppError;
use sync::{CheckinWriter, DedupGuard, DeviceClock, IdentityResolver, Normalizer, SyncEngine};

type Engine = SyncEngine<IclockClient, FrappeClient>;

#[derive(Parser, Debug)]
#[command(name = "zkteco-sync", version, about = "Mirror ZKTeco punch transactions into Frappe HR")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Run the scheduler and the diagnostics server until Ctrl-C.
    Serve,
    /// Run one sync cycle now.
    Sync,
    /// Print the persisted sync state.
    Status,
    /// Fetch today's transactions and preview them without writing.
    TestConnection,
    /// Obtain a device API token with the configured credentials.
    RegisterToken,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(&settings.log_dir);
    info!(timezone = %settings.device_timezone, "Application started");

    match run(cli.command.unwrap_or(Command::Serve), settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Exiting");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, settings: Settings) -> Result<(), AppError> {
    let engine = build_engine(&settings)?;

    match command {
        Command::Serve => serve(Arc::new(engine), &settings).await,
        Command::Sync => print_json(&engine.manual_sync().await),
        Command::Status => print_json(&engine.get_sync_status().await?),
        Command::TestConnection => print_json(&engine.test_connection().await),
        Command::RegisterToken => {
            engine.register_api_token().await?;
            println!("API token registered successfully");
            Ok(())
        }
    }
}

fn build_engine(settings: &Settings) -> Result<Engine, AppError> {
    let source = IclockClient::new(settings.page_size, settings.max_pages)?;
    let host = FrappeClient::new(&settings.frappe)?;
    let store = JsonFileStore::new(&settings.state_file);
    info!(state_file = %store.path().display(), lock_file = %store.lock_path().display(), "Using sync state");
    let engine = SyncEngine::new(
        source,
        host,
        Box::new(store),
        Box::new(DeviceClock::new(settings.device_timezone)),
        Normalizer::new(IdentityResolver::default(), settings.device_timezone),
        CheckinWriter::new(DedupGuard::default()),
    )
    .with_credentials(settings.device_credentials.clone());
    Ok(engine)
}

async fn serve(engine: Arc<Engine>, settings: &Settings) -> Result<(), AppError> {
    let (stop, shutdown) = watch::channel(false);

    let scheduler = tokio::spawn(sync::run_scheduler(engine.clone(), shutdown.clone()));
    let addr = settings.listen_addr;
    let server = tokio::spawn(async move {
        if let Err(e) = diagnostics::serve(engine, addr, shutdown).await {
            error!(error = %e, "Diagnostics server stopped");
        }
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Could not listen for Ctrl-C");
    }
    info!("Shutting down");
    let _ = stop.send(true);

    for result in join_all([scheduler, server]).await {
        if let Err(e) = result {
            error!(error = %e, "Background task failed");
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
