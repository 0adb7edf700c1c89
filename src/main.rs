use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod auth;
mod cli;
mod config;
mod error;
mod extract;
mod fetch;
mod http;
mod provider;
mod report;

use cli::commands::RunSettings;
use report::ReportKind;

#[derive(Parser)]
#[command(
    name = "adextract",
    about = "Extract campaign and performance data from advertising platforms"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RunArgs {
    /// First day of the reporting window (YYYY-MM-DD)
    #[arg(long, env = "START_DATE")]
    start_date: Option<NaiveDate>,
    /// Last day of the reporting window (YYYY-MM-DD, defaults to today)
    #[arg(long, env = "END_DATE")]
    end_date: Option<NaiveDate>,
    /// Skip performance data and only fetch campaigns
    #[arg(long)]
    no_performance: bool,
    /// Credentials file (defaults to <config dir>/adextract/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract Amazon Ads profiles, campaigns and attribution performance
    Amazon {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Extract Microsoft Advertising users, accounts, campaigns and reports
    Bing {
        #[command(flatten)]
        run: RunArgs,
        /// Report to generate per account (repeatable)
        #[arg(long = "report", value_enum, default_value = "campaign")]
        reports: Vec<ReportKind>,
        /// Seconds to wait for each report before giving up
        #[arg(long, default_value = "300")]
        max_wait: u64,
    },

    /// Show how to obtain and configure credentials for a provider
    Setup {
        /// Provider name (amazon or bing)
        provider: String,
    },
}

/// Diagnostics go to stderr; stdout carries only the result document.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("adextract=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn settings<'a>(run: &'a RunArgs, reports: &'a [ReportKind], max_wait: u64) -> RunSettings<'a> {
    RunSettings {
        config_path: run.config.as_deref(),
        start_date: run.start_date,
        end_date: run.end_date,
        no_performance: run.no_performance,
        report_kinds: reports,
        max_wait: Duration::from_secs(max_wait),
    }
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Amazon { run } => cli::commands::cmd_extract(
            "amazon",
            &settings(run, &[], report::DEFAULT_MAX_WAIT.as_secs()),
        ),
        Commands::Bing {
            run,
            reports,
            max_wait,
        } => cli::commands::cmd_extract("bing", &settings(run, reports, *max_wait)),
        Commands::Setup { provider } => cli::commands::cmd_setup(provider),
    };

    if let Err(e) = result {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
