mod history;
mod jobs;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dsched_core::JobStatus;

#[derive(Debug, Parser)]
#[command(name = "dsched")]
#[command(about = "Job scheduler command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Check a jobs file and print each job's trigger and next fire time
    Validate {
        /// Jobs file to check (defaults to `DSCHED_JOBS_PATH`)
        #[arg(long)]
        jobs: Option<PathBuf>,
    },
    /// Run one job once through the execution handler
    Run {
        /// Job id as declared in the jobs file
        job_id: String,
        /// Jobs file to load (defaults to `DSCHED_JOBS_PATH`)
        #[arg(long)]
        jobs: Option<PathBuf>,
    },
    /// Show recorded job executions, newest first (requires `DATABASE_URL`)
    History {
        /// Filter by job name
        #[arg(long)]
        job: Option<String>,
        /// Filter by status: completed, failed or cancelled
        #[arg(long)]
        status: Option<JobStatus>,
        /// Maximum number of records to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = dsched_core::load_app_config()?;
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Validate { jobs } => {
            let path = jobs.unwrap_or_else(|| config.jobs_path.clone());
            jobs::run_validate(&config, &path)?;
        }
        Commands::Run { job_id, jobs } => {
            let path = jobs.unwrap_or_else(|| config.jobs_path.clone());
            jobs::run_once(&config, &path, &job_id).await?;
        }
        Commands::History { job, status, limit } => {
            history::run_history(&config, job, status, limit).await?;
        }
    }

    Ok(())
}
