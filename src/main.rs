//! HAP accessory daemon: serves pair-setup, pair-verify and pairings over TCP.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use hap_core::AccessoryConfig;
use hap_pairing::{BridgeIdentity, FileDatabase, PairingStore};
use hap_server::{HapContext, HapServer};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Command-line arguments
#[derive(Default)]
struct Args {
    /// TOML configuration file
    config: Option<PathBuf>,
    /// Log at debug level
    debug: bool,
}

fn parse_args() -> Args {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => match iter.next() {
                Some(path) => args.config = Some(PathBuf::from(path)),
                None => {
                    eprintln!("--config needs a path");
                    std::process::exit(1);
                }
            },
            "--debug" | "-d" => {
                args.debug = true;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
        }
    }

    args
}

fn print_help() {
    println!("hap-accessory - HomeKit accessory pairing daemon");
    println!();
    println!("Usage: hap-accessory [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --config PATH  Load configuration from a TOML file");
    println!("  -d, --debug        Enable debug logging");
    println!("  -h, --help         Show this help message");
    println!();
    println!("RUST_LOG overrides the log filter when set.");
}

fn setup_logging(args: &Args) {
    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn load_config(args: &Args) -> Result<AccessoryConfig> {
    match &args.config {
        Some(path) => AccessoryConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(AccessoryConfig::default()),
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => tracing::warn!(error = %e, "Cannot listen for SIGTERM"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();
    setup_logging(&args);

    let config = load_config(&args)?;
    info!(name = %config.name, storage = %config.storage_dir.display(), "Starting accessory");
    if config.uses_default_setup_code() {
        tracing::warn!("Using the built-in default setup code; set setup_code in the config file");
    }

    let identity = BridgeIdentity::load_or_generate(&config.identity_path())
        .with_context(|| format!("loading identity from {}", config.identity_path().display()))?;
    info!(id = identity.id(), "Bridge identity ready");

    let database = FileDatabase::open(config.pairings_dir())
        .with_context(|| format!("opening {}", config.pairings_dir().display()))?;
    let store = Arc::new(PairingStore::open(Arc::new(identity), Box::new(database))?);
    info!(paired = store.is_paired(), "Pairing store opened");

    let context = Arc::new(HapContext::from_config(store, &config));
    let server = HapServer::bind(&config, context).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    server.serve(shutdown_rx).await?;

    info!("Accessory stopped");
    Ok(())
}
