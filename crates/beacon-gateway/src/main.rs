//! beacon-gateway - BLE beacon scanner relaying reports to MQTT.
//!
//! Run with: `cargo run -p beacon-gateway -- run`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use beacon_gateway::{
    Config, ConfigStore, Gateway, PrefKey, default_config_path, default_preferences_path,
};

mod service;

/// beacon-gateway - BLE beacon scanner relaying reports to MQTT.
#[derive(Parser, Debug)]
#[command(name = "beacon-gateway")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to the gateway configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the preferences file.
    #[arg(short, long, global = true)]
    preferences: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway in the foreground (default behavior).
    Run,

    /// Read or change preferences.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show the persisted running flag and current preferences.
    Status,

    /// Manage the background service.
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print every preference.
    Show,

    /// Set a preference.
    Set {
        /// rssi_threshold, interval_secs, gateway_id or service_running.
        key: PrefKey,
        value: String,
    },

    /// Remove a preference so its default applies.
    Unset { key: PrefKey },
}

#[derive(Subcommand, Debug)]
enum ServiceAction {
    /// Install beacon-gateway as a service.
    Install {
        /// Install as user-level service (no root/admin required).
        #[arg(long)]
        user: bool,
    },

    /// Uninstall the beacon-gateway service.
    Uninstall {
        /// Uninstall user-level service.
        #[arg(long)]
        user: bool,
    },

    /// Start the beacon-gateway service.
    Start {
        /// Start user-level service.
        #[arg(long)]
        user: bool,
    },

    /// Stop the beacon-gateway service.
    Stop {
        /// Stop user-level service.
        #[arg(long)]
        user: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args);

    match &args.command {
        Some(Command::Config { action }) => handle_config_action(&args, action),
        Some(Command::Status) => show_status(&args),
        Some(Command::Service { action }) => handle_service_action(&args, action),
        Some(Command::Run) | None => run_gateway(&args).await,
    }
}

fn init_logging(args: &Args) {
    let filter = if args.quiet {
        EnvFilter::new("warn")
    } else if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("beacon_gateway=info,beacon_core=info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    config.validate()?;
    Ok(config)
}

fn open_store(args: &Args) -> anyhow::Result<ConfigStore> {
    let store = match &args.preferences {
        Some(path) => ConfigStore::open(path)?,
        None => ConfigStore::open_default()?,
    };
    Ok(store)
}

fn handle_config_action(args: &Args, action: &ConfigAction) -> anyhow::Result<()> {
    let store = open_store(args)?;

    match action {
        ConfigAction::Show => {
            for key in PrefKey::ALL {
                let value = store.get(key).unwrap_or_else(|| "(unset)".to_string());
                println!("{:<16} {}", key, value);
            }
        }
        ConfigAction::Set { key, value } => {
            store.set(*key, value)?;
            println!("{} = {}", key, value.trim());
        }
        ConfigAction::Unset { key } => {
            store.unset(*key)?;
            println!("{} unset", key);
        }
    }

    Ok(())
}

fn show_status(args: &Args) -> anyhow::Result<()> {
    let store = open_store(args)?;
    let settings = store.settings();

    let state = if store.is_running() {
        "running"
    } else {
        "stopped"
    };
    println!("beacon-gateway is {}", state);
    println!("  gateway id:     {}", settings.gateway_id);
    println!("  rssi threshold: {} dBm", settings.rssi_threshold);
    println!("  interval:       {}s", settings.interval.as_secs());

    let missing = store.missing_keys();
    if !missing.is_empty() {
        let names: Vec<_> = missing.iter().map(PrefKey::as_str).collect();
        println!("  not configured: {}", names.join(", "));
    }

    Ok(())
}

fn handle_service_action(args: &Args, action: &ServiceAction) -> anyhow::Result<()> {
    use service::Level;

    let (action_name, result) = match *action {
        ServiceAction::Install { user } => {
            let config = absolute(args.config.as_deref())?;
            let preferences = absolute(args.preferences.as_deref())?;
            (
                "install",
                service::install(
                    Level::from_user_flag(user),
                    config.as_deref(),
                    preferences.as_deref(),
                ),
            )
        }
        ServiceAction::Uninstall { user } => {
            ("uninstall", service::uninstall(Level::from_user_flag(user)))
        }
        ServiceAction::Start { user } => ("start", service::start(Level::from_user_flag(user))),
        ServiceAction::Stop { user } => ("stop", service::stop(Level::from_user_flag(user))),
    };

    match result {
        Ok(()) => {
            println!("Successfully ran '{}' for beacon-gateway", action_name);
            Ok(())
        }
        Err(e) => {
            eprintln!("Failed to {} service: {}", action_name, e);
            Err(e.into())
        }
    }
}

fn absolute(path: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    path.map(|p| {
        std::path::absolute(p).with_context(|| format!("resolving {}", p.display()))
    })
    .transpose()
}

async fn run_gateway(args: &Args) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let store = Arc::new(open_store(args)?);

    info!(
        "Config: {}, preferences: {}",
        args.config
            .clone()
            .unwrap_or_else(default_config_path)
            .display(),
        args.preferences
            .clone()
            .unwrap_or_else(default_preferences_path)
            .display()
    );

    if store.is_running() {
        warn!("Previous session did not shut down cleanly");
    }

    let gateway = Gateway::from_config(config, store);
    gateway.run_until(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown requested");
}
