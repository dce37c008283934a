mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tapkit",
    version,
    about = "Runs paginated-API taps and emits Singer messages"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

/// Inputs shared by the commands that sync.
#[derive(Args)]
struct SyncArgs {
    /// Path to tap YAML file
    tap: PathBuf,
    /// Catalog JSON overriding stream selection and schemas
    #[arg(long)]
    catalog: Option<PathBuf>,
    /// State JSON document to resume from
    #[arg(long, conflicts_with = "state_db")]
    state: Option<PathBuf>,
    /// SQLite database to resume from and persist checkpoints, runs and rejected records to
    #[arg(long)]
    state_db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync selected streams, writing messages to stdout
    Sync(SyncArgs),
    /// Validate the tap definition and reach every stream
    Check {
        /// Path to tap YAML file
        tap: PathBuf,
    },
    /// Print the catalog as JSON
    Discover {
        /// Path to tap YAML file
        tap: PathBuf,
    },
    /// Sync, then run the standard tap tests against the captured records
    Test(SyncArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Sync(args) => commands::sync::execute(&args).await,
        Commands::Check { tap } => commands::check::execute(&tap).await,
        Commands::Discover { tap } => commands::discover::execute(&tap).await,
        Commands::Test(args) => commands::test::execute(&args).await,
    }
}
