//! CLI entry point for devloop.
//!
//! This binary watches the current directory, restarts the configured
//! command on every relevant change, and serves the application behind a
//! live-reloading proxy.
//!
//! # Usage
//!
//! ```bash
//! devloop [OPTIONS] [-- <CMD>...]
//!
//! # Write a default .devloop.toml
//! devloop init
//!
//! # Run with the configured command
//! devloop
//!
//! # Override the command, port and application URL
//! devloop --port 3001 --forward-to http://localhost:3000 -- cargo run
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use dl_core::{CONFIG_FILE_NAME, Config};
use dl_runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Time allowed for a clean shutdown before the process exits anyway.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

// =============================================================================
// CLI ARGUMENT TYPES
// =============================================================================

/// Restart a command on file changes and live-reload the browser.
///
/// Watches the current directory, restarts the command whenever a file
/// changes, and proxies the application so HTML pages reload themselves
/// after each restart.
#[derive(Parser)]
#[command(name = "devloop", version, about, long_about = None)]
struct Cli {
    /// Command to execute. Runs the dev loop when omitted.
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the configuration file.
    #[arg(short, long, env = "DEVLOOP_CONFIG", default_value = CONFIG_FILE_NAME)]
    config: Utf8PathBuf,

    /// Port for the dev server.
    #[arg(short, long, env = "DEVLOOP_PORT")]
    port: Option<u16>,

    /// Base URL of the application to proxy.
    #[arg(short, long, env = "DEVLOOP_FORWARD_TO", value_name = "URL")]
    forward_to: Option<String>,

    /// Extra file-name glob to ignore. May be repeated.
    #[arg(short, long, value_name = "GLOB")]
    exclude: Vec<String>,

    /// Log every watch event.
    #[arg(short, long, env = "DEVLOOP_DEBUG")]
    debug: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,

    /// Command to supervise, replacing the configured one.
    #[arg(last = true, value_name = "CMD")]
    cmd: Vec<String>,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file.
    Init,
}

// =============================================================================
// INITIALIZATION FUNCTIONS
// =============================================================================

/// Initializes the tracing subscriber for logging.
///
/// Respects the `RUST_LOG` environment variable if set. Otherwise, uses
/// `debug` level if `debug` is set, or `info` level by default.
/// Noisy crates like `hyper` and `notify` are filtered to `warn` level.
fn init_tracing(debug: bool, no_color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if debug { "debug" } else { "info" };
        EnvFilter::new(format!(
            "{level},hyper=warn,hyper_util=warn,reqwest=warn,mio=warn,notify=warn"
        ))
    });

    // Check if colors should be disabled (flag or NO_COLOR env var)
    let use_ansi = !no_color && std::env::var("NO_COLOR").is_err();

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_ansi(use_ansi))
        .with(filter)
        .init();
}

/// Loads the configuration file and applies command-line overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be read or decoded, or if the
/// result fails validation.
fn build_config(cli: &Cli) -> color_eyre::Result<Config> {
    let mut config = Config::load(&cli.config)?;

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(url) = &cli.forward_to {
        config.server.forward_to_url.clone_from(url);
    }
    config.watcher.exclude_file.extend(cli.exclude.iter().cloned());
    if !cli.cmd.is_empty() {
        config.exec.cmd.clone_from(&cli.cmd);
    }
    config.debug |= cli.debug;

    config.validate()?;
    Ok(config)
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

/// Writes the default configuration to `path`.
///
/// # Errors
///
/// Returns an error if the file already exists or cannot be written.
fn run_init(path: &Utf8Path) -> color_eyre::Result<()> {
    Config::init(path)?;
    info!(path = %path, "Wrote default configuration");
    Ok(())
}

/// Runs the dev loop in the current directory until interrupted.
///
/// # Errors
///
/// Returns the startup error or the first fatal error raised while running.
async fn run_dev(config: Config) -> color_eyre::Result<()> {
    let root = Utf8PathBuf::try_from(std::env::current_dir()?)?;
    let forward_to = config.server.forward_to_url.clone();

    let runtime = Runtime::new(&root, config).await?;
    info!(
        url = %format!("http://localhost:{}", runtime.local_addr().port()),
        forward_to = %forward_to,
        "Dev server ready"
    );

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));
    tokio::spawn(fail_fast(cancel.clone()));

    runtime.run(cancel).await?;
    info!("Stopped");
    Ok(())
}

/// Cancels `cancel` on SIGINT, SIGTERM or SIGHUP.
async fn cancel_on_signal(cancel: CancellationToken) {
    match wait_for_signal().await {
        Ok(()) => info!("Received signal, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for signals, shutting down"),
    }
    cancel.cancel();
}

async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sighup = signal(SignalKind::hangup())?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = sigterm.recv() => {}
            _ = sighup.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}

/// Exits the process if shutdown has not finished within the deadline.
#[allow(clippy::exit)] // Last resort against a stuck subsystem
async fn fail_fast(cancel: CancellationToken) {
    cancel.cancelled().await;
    tokio::time::sleep(SHUTDOWN_DEADLINE).await;
    error!(
        deadline_secs = SHUTDOWN_DEADLINE.as_secs(),
        "Shutdown did not finish in time, exiting"
    );
    std::process::exit(1);
}

// =============================================================================
// MAIN ENTRY POINT
// =============================================================================

/// Application entry point.
#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // 1. Install color-eyre FIRST (before any potential panics)
    color_eyre::install()?;

    // 2. Parse CLI arguments
    let cli = Cli::parse();

    // 3. Route to the command
    match cli.command {
        Some(Commands::Init) => {
            init_tracing(false, cli.no_color);
            run_init(&cli.config)
        }
        None => {
            let config = build_config(&cli)?;
            init_tracing(config.debug, cli.no_color);
            run_dev(config).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    fn missing_config(dir: &TempDir) -> String {
        dir.path().join("absent.toml").to_string_lossy().into_owned()
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_overrides_apply_over_defaults() {
        let dir = TempDir::new().unwrap();
        let config_path = missing_config(&dir);
        let cli = Cli::try_parse_from([
            "devloop",
            "--config",
            config_path.as_str(),
            "--port",
            "3001",
            "--forward-to",
            "http://localhost:3000",
            "--exclude",
            "*.tmp",
            "-e",
            "*.log",
            "--",
            "cargo",
            "run",
        ])
        .unwrap();

        let config = build_config(&cli).unwrap();
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.server.forward_to_url, "http://localhost:3000");
        assert_eq!(config.exec.cmd, vec!["cargo", "run"]);
        assert!(config.watcher.exclude_file.ends_with(&[
            "*.tmp".to_owned(),
            "*.log".to_owned()
        ]));
        assert!(config.watcher.exclude_file.contains(&"*_test.go".to_owned()));
    }

    #[test]
    fn test_file_values_survive_without_flags() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "debug = true\n[server]\nport = 9000\n").unwrap();

        let cli = Cli::try_parse_from(["devloop", "--config", path.to_str().unwrap()]).unwrap();
        let config = build_config(&cli).unwrap();
        assert!(config.debug);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.exec.cmd, vec!["go", "run", "."]);
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let dir = TempDir::new().unwrap();
        let config_path = missing_config(&dir);
        let cli = Cli::try_parse_from([
            "devloop",
            "--config",
            config_path.as_str(),
            "--forward-to",
            "localhost:3000",
        ])
        .unwrap();
        assert!(build_config(&cli).is_err());
    }

    #[test]
    fn test_init_subcommand() {
        let dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join(CONFIG_FILE_NAME)).unwrap();

        let cli = Cli::try_parse_from(["devloop", "--config", path.as_str(), "init"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Init)));

        run_init(&cli.config).unwrap();
        assert!(path.exists());
        assert!(run_init(&cli.config).is_err());
    }
}
