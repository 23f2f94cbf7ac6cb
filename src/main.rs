use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gtfs_rt_aggregator::{run_pipeline, Config};

#[derive(Debug, Parser)]
#[command(name = "gtfs-rt-aggregator", version, about = "GTFS-Realtime data aggregator")]
struct Cli {
    /// Path to the TOML configuration file
    toml_path: PathBuf,

    /// Default log filter (overridable via RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.kind() == ErrorKind::MissingRequiredArgument => {
            eprintln!("error: the following arguments are required: toml_path");
            eprintln!("usage: gtfs-rt-aggregator <toml_path> [--log-level LEVEL]");
            return ExitCode::from(2);
        }
        Err(e) => {
            // clap handles --help/--version and other parse errors itself
            e.exit();
        }
    };

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = match Config::load(&cli.toml_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        providers = config.providers.len(),
        config = %cli.toml_path.display(),
        "Loaded configuration"
    );

    if let Err(e) = run_pipeline(config).await {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
