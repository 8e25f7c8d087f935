//! Slave simulator daemon entry point.
//!
//! Loads the configuration, starts the slave server and runs until SIGINT or
//! SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use ecsim_common::config::{DeviceKind, SimConfig};
use ecsim_daemon::signals::{wait_for_shutdown, SignalHandler};
use ecsim_daemon::SlaveServer;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Environment variable naming a configuration file.
const CONFIG_ENV: &str = "ECSIM_CONFIG_PATH";

/// EtherCAT slave simulator command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "ecsim-daemon",
    about = "EtherCAT slave simulator - serves virtual slaves to a master over TCP or UDS",
    version,
    long_about = None
)]
struct Args {
    /// Path to a configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen endpoint, `tcp://host:port` or `uds://path` (overrides config file).
    #[arg(long, short = 'e', value_name = "ENDPOINT")]
    endpoint: Option<String>,

    /// Number of virtual slaves per connection (overrides config file).
    #[arg(long, short = 'n', value_name = "COUNT")]
    slaves: Option<usize>,

    /// Device profile: generic or el1258 (overrides config file).
    #[arg(long, short = 'd', value_name = "KIND")]
    device: Option<DeviceKind>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting EtherCAT slave simulator");

    let mut config = load_config(&args)?;
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    info!(
        endpoint = %config.endpoint,
        slaves = config.slave_count,
        device = ?config.device,
        ?config.poll_interval,
        "Configuration loaded"
    );

    let signal_handler = SignalHandler::new().context("Failed to set up signal handlers")?;

    let server = SlaveServer::start(&config)
        .with_context(|| format!("Failed to start slave server on {}", config.endpoint))?;

    // Wake up once per poll interval to notice a server thread that died.
    while !wait_for_shutdown(&signal_handler, config.poll_interval, || server.is_running()) {
        if !server.is_running() {
            error!("Server thread exited unexpectedly");
            break;
        }
    }

    let stats = server.diagnostics().snapshot();
    server.stop();
    info!(stats = %stats.to_json(), "EtherCAT slave simulator stopped");
    Ok(())
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!("ecsim_daemon={level},ecsim_bus={level},ecsim_common={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `ECSIM_CONFIG_PATH` environment variable
/// 3. `config/default.toml` (local development)
/// 4. Built-in defaults
fn load_config(args: &Args) -> Result<SimConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return SimConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()));
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from {CONFIG_ENV}");
            return SimConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from {CONFIG_ENV}={env_path}"));
        }
        warn!(
            path = %env_path,
            "{CONFIG_ENV} set but file does not exist, checking other locations"
        );
    }

    let local_path = PathBuf::from("config/default.toml");
    if local_path.exists() {
        info!(?local_path, "Loading config from local path");
        return SimConfig::from_file(&local_path)
            .with_context(|| format!("Failed to load config from {}", local_path.display()));
    }

    info!("No config file found, using built-in defaults");
    Ok(SimConfig::default())
}

/// Command-line flags win over the configuration file.
fn apply_overrides(config: &mut SimConfig, args: &Args) {
    if let Some(endpoint) = &args.endpoint {
        config.endpoint.clone_from(endpoint);
    }
    if let Some(slaves) = args.slaves {
        config.slave_count = slaves;
    }
    if let Some(device) = args.device {
        config.device = device;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("ecsim-daemon").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn test_cli_overrides() {
        let args = parse(&["--endpoint", "tcp://0.0.0.0:6000", "--slaves", "4", "--device", "generic"]);
        let mut config = SimConfig::default();
        apply_overrides(&mut config, &args);
        assert_eq!(config.endpoint, "tcp://0.0.0.0:6000");
        assert_eq!(config.slave_count, 4);
        assert_eq!(config.device, DeviceKind::Generic);
    }

    #[test]
    fn test_cli_rejects_unknown_device() {
        let result = Args::try_parse_from(["ecsim-daemon", "--device", "el9999"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_from_argument() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.toml");
        std::fs::write(&path, "slave_count = 3\nendpoint = \"uds://@ecsim-test\"\n").unwrap();

        let args = parse(&["--config", path.to_str().unwrap()]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.slave_count, 3);
        assert_eq!(config.endpoint, "uds://@ecsim-test");
    }

    #[test]
    fn test_load_config_missing_file_fails() {
        let args = parse(&["--config", "/nonexistent/ecsim.toml"]);
        assert!(load_config(&args).is_err());
    }
}
