use std::process::ExitCode;
use std::time::Duration;

use tracing::{error, info};

use feedhook::config::{CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use feedhook::feed::shutdown_signal;
use feedhook::{Config, FeedUpdater, Reader};

#[tokio::main]
async fn main() -> ExitCode {
    let config_path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    // Load configuration
    let config = match Config::load_with_env(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {config_path}: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    // Initialize logging
    if let Err(e) = feedhook::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        feedhook::logging::init_console_only(&config.logging.level);
    }

    info!("feedhook {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    let reader = match Reader::from_config(
        &config.reader,
        Duration::from_secs(config.sync.fetch_timeout_secs),
    ) {
        Ok(reader) => reader,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let updater = match FeedUpdater::new(&config, reader) {
        Ok(updater) => updater,
        Err(e) => {
            error!("Failed to start: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match updater.definitions().ensure_template() {
        Ok(None) => {}
        Ok(Some(path)) => {
            error!(
                "No feeds configured in {}; edit {} and save it as a .toml file",
                updater.definitions().dir().display(),
                path.display()
            );
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!("Failed to prepare feeds directory: {}", e);
            return ExitCode::FAILURE;
        }
    }

    if config.sync.default_destinations.is_empty() {
        info!("No default destinations; feeds without their own destinations are skipped");
    }

    match updater.run(shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to write final status: {}", e);
            ExitCode::FAILURE
        }
    }
}
