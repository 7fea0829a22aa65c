//! vord - voucher transaction orchestration daemon.
//!
//! One process serves the control API and supervises per-binding workers.
//! Multiple replicas may share a registry; the single-holder lock decides
//! which replica drives each binding.
//!
//! See `vord --help` for usage.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use vord::audit::AuditStore;
use vord::config::OrchConfig;
use vord::http;
use vord::logging;
use vord::metrics;
use vord::orchestrator::Orchestrator;
use vord::registry::Registry;

/// Clean shutdown.
const EXIT_OK: u8 = 0;
/// Configuration could not be loaded or validated.
const EXIT_CONFIG_ERROR: u8 = 1;
/// The registry could not be opened at startup.
const EXIT_REGISTRY_UNREACHABLE: u8 = 2;

#[derive(Parser)]
#[command(name = "vord")]
#[command(version)]
#[command(about = "vord - voucher transaction orchestration daemon")]
#[command(
    long_about = "Per-binding transaction orchestrator: workers drive purchase cycles \
                  against upstream providers, coordinated through a shared registry."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon: control API plus worker supervision
    ///
    /// Examples:
    ///   vord serve                     # Default port, ~/.vord/vord.toml
    ///   vord serve --port 8080         # Custom port
    ///   vord serve --config ./dev.toml # Explicit config file
    Serve {
        /// Port for the control API (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,
        /// Path to the config file (default: ~/.vord/vord.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Emit JSON logs instead of pretty output
        #[arg(long)]
        json_logs: bool,
    },
    /// Validate the configuration and exit
    CheckConfig {
        /// Path to the config file (default: ~/.vord/vord.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            config,
            json_logs,
        } => {
            logging::init_logging(json_logs);
            serve(port, config.as_deref())
        }
        Commands::CheckConfig { config } => {
            logging::init_logging(false);
            match OrchConfig::load(config.as_deref(), None) {
                Ok(_) => {
                    info!("configuration is valid");
                    ExitCode::from(EXIT_OK)
                }
                Err(err) => {
                    error!("{err:#}");
                    ExitCode::from(EXIT_CONFIG_ERROR)
                }
            }
        }
    }
}

fn serve(port: Option<u16>, config_path: Option<&std::path::Path>) -> ExitCode {
    let config = match OrchConfig::load(config_path, port) {
        Ok(config) => config,
        Err(err) => {
            error!("configuration error: {err:#}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("failed to start runtime: {err}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    runtime.block_on(async {
        metrics::init_metrics();

        let registry = match Registry::open(&config.registry_path) {
            Ok(registry) => registry,
            Err(err) => {
                error!(
                    path = %config.registry_path.display(),
                    "registry unreachable: {err:#}"
                );
                return ExitCode::from(EXIT_REGISTRY_UNREACHABLE);
            }
        };
        let audit = match AuditStore::open(&config.audit_path) {
            Ok(audit) => Arc::new(audit),
            Err(err) => {
                error!(
                    path = %config.audit_path.display(),
                    "audit store unreachable: {err:#}"
                );
                return ExitCode::from(EXIT_REGISTRY_UNREACHABLE);
            }
        };

        let api_port = config.api_port;
        let default_interval_ms = config.worker_interval_ms_default;
        let orchestrator = Arc::new(Orchestrator::new(config, registry, audit));

        match http::serve(orchestrator, api_port, default_interval_ms).await {
            Ok(()) => {
                info!("clean shutdown");
                ExitCode::from(EXIT_OK)
            }
            Err(err) => {
                error!("server error: {err:#}");
                ExitCode::from(EXIT_CONFIG_ERROR)
            }
        }
    })
}
