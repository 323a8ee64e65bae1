//! CLI argument parsing and dispatch.

mod insights;
mod schools;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use schoolbrief::{create_provider, BriefError, Config, InsightService, SchoolStore};

#[derive(Parser)]
#[command(name = "schoolbrief")]
#[command(version)]
#[command(about = "Conversation-starter briefings for school sales calls")]
struct Cli {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// School CSV to load instead of the configured one
    #[arg(long, global = true, value_name = "PATH")]
    data: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List schools
    List {
        /// Case-insensitive name filter
        #[arg(short, long)]
        search: Option<String>,
        /// Only schools with agency supply spend
        #[arg(long)]
        agency_spend: bool,
    },
    /// Show a school's record
    Show {
        /// School URN or exact name
        school: String,
    },
    /// Schools most worth calling, highest priority first
    Suggest {
        /// How many schools to show
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
    /// Generate (or fetch cached) conversation starters for a school
    Insights {
        /// School URN or exact name
        school: String,
        /// Ignore the cache and regenerate
        #[arg(short, long)]
        refresh: bool,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove cached insights for one school, or all of them
    ClearCache {
        /// School URN or exact name (omit to clear everything)
        school: Option<String>,
        /// Only remove expired or unreadable entries
        #[arg(long, conflicts_with = "school")]
        expired: bool,
    },
    /// Dataset and cache statistics
    Stats,
}

/// Parse arguments, run the command, and map failures to an exit code.
pub(crate) async fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<BriefError>() {
                Some(brief) => {
                    eprintln!("Error: {}", brief.user_message());
                    if let Some(raw) = brief.raw_response() {
                        debug!(raw_response = raw, "Raw model output");
                    }
                }
                None => eprintln!("Error: {:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "schoolbrief=debug"
    } else {
        "schoolbrief=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn dispatch(cli: Cli) -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(path) = cli.data {
        config.data.csv_path = path;
    }

    match cli.command {
        Commands::List {
            search,
            agency_spend,
        } => {
            let store = load_store(&config)?;
            schools::cmd_list(&store, search.as_deref(), agency_spend);
        }
        Commands::Show { school } => {
            let store = load_store(&config)?;
            schools::cmd_show(&store, &school)?;
        }
        Commands::Suggest { limit } => {
            let service = build_service(&config)?;
            insights::cmd_suggest(&service, limit);
        }
        Commands::Insights {
            school,
            refresh,
            json,
        } => {
            let service = build_service(&config)?;
            insights::cmd_insights(&service, &school, refresh, json).await?;
        }
        Commands::ClearCache { school, expired } => {
            let service = build_service(&config)?;
            insights::cmd_clear_cache(&service, school.as_deref(), expired)?;
        }
        Commands::Stats => {
            let service = build_service(&config)?;
            insights::cmd_stats(&service)?;
        }
    }
    Ok(())
}

fn load_store(config: &Config) -> Result<SchoolStore> {
    let store = SchoolStore::load(&config.data.csv_path)?;
    Ok(store)
}

/// Store, provider and cache wired together. Needs an API key.
fn build_service(config: &Config) -> Result<InsightService> {
    let store = Arc::new(load_store(config)?);
    let provider = create_provider(config)?;
    Ok(InsightService::from_config(config, store, provider)?)
}
