#![forbid(unsafe_code)]

use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use tether_engines::http_client::UreqHttpClient;
use tether_os::clock::SystemClock;
use tether_os::config::TetherConfig;
use tether_os::probe::StaticInstallationProbe;
use tether_os::triggers::TriggerSurface;
use tether_storage::kv::TetherStore;
use tether_tools::cli::{execute_command, USAGE};
use tracing_subscriber::EnvFilter;

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .ok();

    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = env::args().skip(1).collect();
    let subcommand = args.first().ok_or_else(|| USAGE.to_string())?.as_str();
    let request_id = args.get(1).map(String::as_str);
    let activation_key = if subcommand == "activate" {
        request_id.ok_or_else(|| "usage: tether activate <request_id>".to_string())?;
        Some(read_activation_key()?)
    } else {
        None
    };

    let config = TetherConfig::from_env().map_err(|e| format!("invalid configuration: {e}"))?;
    let probe = StaticInstallationProbe::from_env()
        .map_err(|e| format!("invalid installation identity: {e}"))?;
    let store = open_store()?;
    let mut surface = TriggerSurface::new(
        store,
        config,
        UreqHttpClient::default(),
        probe,
        SystemClock,
    );
    let output = execute_command(
        &mut surface,
        subcommand,
        request_id,
        activation_key.as_deref(),
    )?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

fn open_store() -> Result<TetherStore, String> {
    let path = env::var("TETHER_STATE_PATH")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);
    match path {
        Some(path) => TetherStore::open_file(&path)
            .map_err(|e| format!("failed to open state store '{}': {e}", path.display())),
        None => {
            tracing::warn!("TETHER_STATE_PATH not set; nothing from this run is kept");
            Ok(TetherStore::new_in_memory())
        }
    }
}

fn read_activation_key() -> Result<String, String> {
    let value = if io::stdin().is_terminal() {
        rpassword::prompt_password("Enter activation key:").map_err(|e| e.to_string())?
    } else {
        let mut input = String::new();
        io::stdin()
            .read_to_string(&mut input)
            .map_err(|e| e.to_string())?;
        input
    };
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        return Err("activation key must not be empty".to_string());
    }
    Ok(trimmed)
}
