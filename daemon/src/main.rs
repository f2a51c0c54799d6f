//! fleetdeck daemon entry point
//!
//! Serves the release delivery API for one application and runs the
//! background workers that keep its downstreams current.

use std::collections::HashMap;
use std::env;

use colored::Colorize;
use fleetdeck::app::options::AppOptions;
use fleetdeck::app::run::run;
use fleetdeck::logs::{init_logging, LogOptions};
use fleetdeck::storage::layout::StorageLayout;
use fleetdeck::storage::settings::Settings;
use fleetdeck::utils::version_info;

use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    let layout = match cli_args.get("base-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    // Retrieve the settings file; a missing file means defaults
    let settings_file = match cli_args.get("config") {
        Some(path) => fleetdeck::filesys::file::File::new(path),
        None => layout.settings_file(),
    };
    let settings_present = settings_file.exists().await;
    let settings = if settings_present {
        match settings_file.read_json::<Settings>().await {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!(
                    "{} unable to read settings file {}: {}",
                    "error:".red().bold(),
                    settings_file.path().display(),
                    e
                );
                std::process::exit(1);
            }
        }
    } else {
        Settings::default()
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
        log_dir: settings
            .log_to_file
            .then(|| layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{} failed to initialize logging: {}", "warning:".yellow(), e);
            None
        }
    };

    if !settings_present {
        warn!(
            "No settings file at {}, using defaults",
            settings_file.path().display()
        );
    }

    println!(
        "{} {} ({}) managing {}",
        "fleetdeck".green().bold(),
        version.version,
        version.git_hash,
        settings.app_slug.cyan()
    );

    let options = AppOptions::from_settings(&settings, layout);
    info!("Running fleetdeck with options: {:?}", options);
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run fleetdeck: {e}");
        std::process::exit(1);
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                _ => {
                    error!("Unable to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
