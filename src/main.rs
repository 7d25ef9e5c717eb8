use clap::Parser;
use govsync::cli::Cli;
use govsync::cli::Commands;
use govsync::AppConfig;
use govsync::GovSync;
use govsync::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging
    if cli.verbose {
        govsync::logging::init_logging_with_level("debug")?;
    } else {
        govsync::logging::init_logging_with_config(Some(&config))?;
    }
    tracing::debug!("Configuration loaded successfully");

    // Config display works without Redis or RPC access
    if cli.command == Commands::Config {
        return govsync::cli::handle_config_command(&config);
    }

    let govsync = GovSync::new(&config).await?;

    match cli.command {
        Commands::Sync { from_block } => {
            govsync::cli::handle_sync_command(&govsync, from_block).await?;
        }
        Commands::Watch { interval_secs } => {
            govsync::cli::handle_watch_command(&govsync, interval_secs).await?;
        }
        Commands::Stats { json } => {
            govsync::cli::handle_stats_command(&govsync, json).await?;
        }
        Commands::Delegators { limit } => {
            govsync::cli::handle_delegators_command(&govsync, limit).await?;
        }
        Commands::Refresh { address } => {
            govsync::cli::handle_refresh_command(&govsync, &address).await?;
        }
        Commands::Summary { address } => {
            govsync::cli::handle_summary_command(&govsync, &address).await?;
        }
        Commands::Status => {
            govsync::cli::handle_status_command(&govsync).await?;
        }
        Commands::Config => {
            govsync::cli::handle_config_command(&config)?;
        }
    }

    Ok(())
}
