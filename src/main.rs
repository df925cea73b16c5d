mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::{ProduceArgs, Services};
use ratecast::config::Config;

#[derive(Parser)]
#[command(
    name = "ratecast",
    version,
    about = "Scheduled exchange-rate content producer and multi-channel publisher",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (environment variables are used otherwise)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); defaults to the configured format
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and the drain loop until Ctrl-C
    Run,

    /// Run one producer for a country and collection
    Produce {
        /// Country code, e.g. pl
        #[arg(long)]
        country: String,

        /// Slot time override (HH:MM)
        #[arg(long)]
        time: Option<String>,

        /// Template override
        #[arg(long)]
        template: Option<String>,

        /// Subscription collection
        #[arg(long, default_value = "subscriptions-users")]
        collection: String,

        /// Restrict to one subscription id
        #[arg(long)]
        id: Option<String>,

        /// Local date time override (YYYY-MM-DD HH:MM[:SS])
        #[arg(long, value_parser = commands::produce::parse_datetime)]
        datetime: Option<chrono::NaiveDateTime>,
    },

    /// Drain queued content
    Drain {
        /// Process a single item and exit
        #[arg(long, default_value = "false")]
        once: bool,
    },

    /// Inspect or edit the content queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Print the number of queued items
    Depth,

    /// Remove one queued item of a subscription
    Remove {
        /// Subscription id (hex or typed form)
        subscription_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate()?;

    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&format, &config.logging.level, cli.verbose)?;

    if let Err(e) = ratecast::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed");
    }

    tracing::info!(environment = %config.store.environment, "ratecast starting");
    let services = Services::new(config)?;

    match cli.command {
        Commands::Run => {
            tracing::info!("Starting run command");
            commands::run(&services).await?;
        }

        Commands::Produce {
            country,
            time,
            template,
            collection,
            id,
            datetime,
        } => {
            tracing::info!(
                country = %country,
                collection = %collection,
                time = ?time,
                template = ?template,
                id = ?id,
                "Starting produce command"
            );
            commands::produce(
                &services,
                ProduceArgs {
                    country,
                    collection,
                    time,
                    template,
                    id,
                    datetime,
                },
            )
            .await?;
        }

        Commands::Drain { once } => {
            tracing::info!(once = %once, "Starting drain command");
            commands::drain(&services, once).await?;
        }

        Commands::Queue { action } => match action {
            QueueAction::Depth => commands::queue_depth(&services).await?,
            QueueAction::Remove { subscription_id } => {
                commands::queue_remove(&services, &subscription_id).await?
            }
        },
    }

    tracing::info!("ratecast finished");
    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("ratecast=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_new(format!("ratecast={level},warn"))?
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
