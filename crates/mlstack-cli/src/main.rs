//! mlstack CLI tool.

use clap::{Parser, Subcommand, ValueEnum};
use mlstack_config::DEFAULT_CONFIG_FILE;
use tracing_subscriber::EnvFilter;

mod commands;
mod demo;

use commands::seldon::SeldonArgs;
use commands::services::ServicesCommand;
use commands::train::TrainArgs;

#[derive(Parser)]
#[command(name = "mlstack")]
#[command(about = "Run ML pipelines on a configured stack", long_about = None)]
struct Cli {
    /// Stack configuration file
    #[arg(long, global = true, env = "MLSTACK_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Train, deploy and query a model with the active model deployer
    Seldon(SeldonArgs),
    /// Run the training pipeline
    Train(TrainArgs),
    /// Validate a stack configuration
    Validate {
        /// Path to the configuration file
        #[arg(default_value = DEFAULT_CONFIG_FILE)]
        path: String,
    },
    /// Manage deployed model services
    Services {
        #[command(subcommand)]
        command: ServicesCommand,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Seldon(args) => {
            commands::seldon::run(&cli.config, args).await?;
        }
        Commands::Train(args) => {
            commands::train::run(&cli.config, args).await?;
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
        Commands::Services { command } => {
            commands::services::run(&cli.config, command).await?;
        }
    }

    Ok(())
}
