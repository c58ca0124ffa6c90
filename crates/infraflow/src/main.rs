mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "infraflow")]
#[command(about = "Cluster network reconciliation, offline tooling", long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a terraform state into an infraflow state
    Migrate {
        /// Terraform state file, plain, base64 or gzip encoded
        #[arg(long)]
        terraform_state: PathBuf,
        /// Desired infrastructure configuration (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,
        /// Write the state to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Inspect persisted state
    #[command(subcommand)]
    State(StateCommands),
    /// Work with infrastructure configuration
    #[command(subcommand)]
    Config(ConfigCommands),
    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum StateCommands {
    /// List the keys of a state file
    Show {
        /// State file written by infraflow
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Check an infrastructure configuration
    Validate {
        /// Configuration file (YAML or JSON)
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = if cli.verbose {
        EnvFilter::new(default_level)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Migrate {
            terraform_state,
            config,
            output,
        } => {
            commands::migrate::handle(&terraform_state, &config, output.as_deref()).await?;
        }
        Commands::State(StateCommands::Show { file }) => {
            commands::state::show(&file).await?;
        }
        Commands::Config(ConfigCommands::Validate { file }) => {
            commands::config::validate(&file).await?;
        }
        Commands::Version => {
            println!("infraflow {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
