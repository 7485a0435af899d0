use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use fleetscan::scrape_config::ScraperConfig;
use fleetscan::scraping_jobs::{JobPriority, JobType};
use fleetscan::{commands, db};

#[derive(Parser)]
#[command(name = "fleetscan", version, about = "Airline fleet catalog scraping engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PriorityArg {
    High,
    Normal,
    Low,
}

impl From<PriorityArg> for JobPriority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::High => JobPriority::High,
            PriorityArg::Normal => JobPriority::Normal,
            PriorityArg::Low => JobPriority::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum JobTypeArg {
    FullFleetUpdate,
    AircraftDetails,
    Validation,
}

impl From<JobTypeArg> for JobType {
    fn from(arg: JobTypeArg) -> Self {
        match arg {
            JobTypeArg::FullFleetUpdate => JobType::FullFleetUpdate,
            JobTypeArg::AircraftDetails => JobType::AircraftDetails,
            JobTypeArg::Validation => JobType::Validation,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler daemon (queue polling + cron enqueue)
    Run,
    /// Run a one-shot fleet update for an airline
    Scrape {
        /// Airline IATA or ICAO code
        airline: String,
        /// Prefer a fresh crawl over cached pages
        #[arg(long)]
        force: bool,
        /// Run all phases except persistence
        #[arg(long)]
        dry_run: bool,
    },
    /// Enqueue a scraping job for an airline
    Enqueue {
        /// Airline IATA or ICAO code
        airline: String,
        #[arg(long, value_enum, default_value_t = PriorityArg::Normal)]
        priority: PriorityArg,
        #[arg(long, value_enum, default_value_t = JobTypeArg::FullFleetUpdate)]
        job_type: JobTypeArg,
    },
    /// Inspect or maintain the job queue
    Jobs {
        /// Print the status of one job
        #[arg(long)]
        status: Option<String>,
        /// Cancel a pending or running job
        #[arg(long)]
        cancel: Option<String>,
        /// Delete terminal jobs older than this many days
        #[arg(long, value_name = "DAYS")]
        cleanup: Option<i64>,
    },
    /// Print a monitoring snapshot
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL must be set in the environment")?;
    let pool = db::create_pool(&database_url)?;
    db::run_migrations(&pool)?;
    let config = ScraperConfig::from_env();

    match cli.command {
        Commands::Run => commands::handle_run(pool, config).await,
        Commands::Scrape {
            airline,
            force,
            dry_run,
        } => commands::handle_scrape(pool, config, &airline, force, dry_run).await,
        Commands::Enqueue {
            airline,
            priority,
            job_type,
        } => {
            commands::handle_enqueue(pool, config, &airline, priority.into(), job_type.into())
                .await
        }
        Commands::Jobs {
            status,
            cancel,
            cleanup,
        } => commands::handle_jobs(pool, status.as_deref(), cancel.as_deref(), cleanup).await,
        Commands::Stats => commands::handle_stats(pool).await,
    }
}
