//! Execution history query for the CLI.

use dsched_core::{AppConfig, ConfigError, HistoryRecord, JobStatus};
use dsched_db::{HistoryFilter, PoolConfig};

/// Format a run duration for display, returning `"-"` when absent.
pub(crate) fn fmt_duration(secs: Option<f64>) -> String {
    secs.map_or_else(|| "-".to_string(), |s| format!("{s:.1}s"))
}

fn print_records(records: &[HistoryRecord], timezone: chrono_tz::Tz) {
    if records.is_empty() {
        println!("no history records found");
        return;
    }

    println!(
        "{:<20} {:<24} {:<10} {:>8} {:>8}  ERROR",
        "STARTED", "JOB", "STATUS", "TOOK", "ATTEMPTS"
    );
    for record in records {
        println!(
            "{:<20} {:<24} {:<10} {:>8} {:>8}  {}",
            record
                .started_at
                .with_timezone(&timezone)
                .format("%Y-%m-%d %H:%M:%S"),
            record.job_name,
            record.status.as_str(),
            fmt_duration(record.duration_secs),
            record.attempts,
            record.error.as_deref().unwrap_or(""),
        );
    }
}

/// Print execution history from Postgres, newest first.
///
/// # Errors
///
/// Returns an error if `DATABASE_URL` is unset or the query fails.
pub(crate) async fn run_history(
    config: &AppConfig,
    job_name: Option<String>,
    status: Option<JobStatus>,
    limit: usize,
) -> anyhow::Result<()> {
    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;

    let store = dsched_db::connect_store(url, PoolConfig::from_app_config(config)).await?;
    let filter = HistoryFilter {
        job_id: None,
        job_name,
        status,
        limit: limit.max(1),
    };
    let records = dsched_db::list_job_history(&store, &filter).await?;

    print_records(&records, config.timezone);
    Ok(())
}
