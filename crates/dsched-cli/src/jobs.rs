//! Job definition command handlers for the CLI.
//!
//! `validate` is read-only. `run` executes one job through the same
//! execution handler the daemon uses, so history and failure alerts are
//! recorded exactly as for a scheduled firing.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use dsched_core::{AppConfig, JobStatus};
use dsched_db::{DocumentStore, MemoryStore, PoolConfig};
use dsched_scheduler::{job_from_definition, notifier_from_config, ExecutionHandler, Trigger};

/// One row of `validate` output.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ValidatedJob {
    pub id: String,
    pub enabled: bool,
    pub trigger: String,
    pub next_fire: Option<DateTime<Utc>>,
}

/// Format an optional fire time for display, returning `"-"` when `None`.
fn fmt_fire_time(time: Option<DateTime<Utc>>, timezone: chrono_tz::Tz) -> String {
    time.map_or_else(
        || "-".to_string(),
        |t| t.with_timezone(&timezone).format("%Y-%m-%d %H:%M:%S %Z").to_string(),
    )
}

/// Check every definition's trigger and hook options.
///
/// Returns one row per job, or the list of problems found.
pub(crate) fn validate_jobs(
    jobs: &dsched_core::JobsFile,
    timezone: chrono_tz::Tz,
    now: DateTime<Utc>,
) -> Result<Vec<ValidatedJob>, Vec<String>> {
    let client = reqwest::Client::new();
    let mut rows = Vec::with_capacity(jobs.jobs.len());
    let mut problems = Vec::new();

    for definition in &jobs.jobs {
        let trigger = match Trigger::from_kind(
            &definition.trigger.kind,
            &definition.trigger.fields,
            timezone,
        ) {
            Ok(trigger) => trigger,
            Err(e) => {
                problems.push(format!("job '{}': {e}", definition.id));
                continue;
            }
        };
        if let Err(e) = job_from_definition(definition, &client) {
            problems.push(e.to_string());
            continue;
        }

        rows.push(ValidatedJob {
            id: definition.id.clone(),
            enabled: definition.enabled,
            trigger: trigger.describe(),
            next_fire: trigger.next_fire_after(now, now),
        });
    }

    if problems.is_empty() {
        Ok(rows)
    } else {
        Err(problems)
    }
}

/// Load a jobs file and print each job's trigger and next fire time.
///
/// # Errors
///
/// Returns an error if the file cannot be loaded or any definition is invalid.
pub(crate) fn run_validate(config: &AppConfig, path: &Path) -> anyhow::Result<()> {
    let jobs = dsched_core::load_jobs_file(path)?;

    let rows = match validate_jobs(&jobs, config.timezone, Utc::now()) {
        Ok(rows) => rows,
        Err(problems) => {
            for problem in &problems {
                eprintln!("error: {problem}");
            }
            anyhow::bail!(
                "{} invalid job definition(s) in {}",
                problems.len(),
                path.display()
            );
        }
    };

    println!("{:<24} {:<8} {:<40} NEXT FIRE", "JOB", "ENABLED", "TRIGGER");
    for row in &rows {
        println!(
            "{:<24} {:<8} {:<40} {}",
            row.id,
            if row.enabled { "yes" } else { "no" },
            row.trigger,
            if row.enabled {
                fmt_fire_time(row.next_fire, config.timezone)
            } else {
                "-".to_string()
            }
        );
    }
    println!(
        "{} job(s) valid, {} enabled",
        rows.len(),
        jobs.enabled().count()
    );
    Ok(())
}

/// Run one job once and print its result as JSON.
///
/// History goes to Postgres when `DATABASE_URL` is set, otherwise it is kept
/// in memory for the duration of the command.
///
/// # Errors
///
/// Returns an error if the job cannot be found or built, the store cannot be
/// opened, or the run does not complete.
pub(crate) async fn run_once(config: &AppConfig, path: &Path, job_id: &str) -> anyhow::Result<()> {
    let jobs = dsched_core::load_jobs_file(path)?;
    let definition = jobs
        .find(job_id)
        .with_context(|| format!("job '{job_id}' not found in {}", path.display()))?;

    let job = job_from_definition(definition, &reqwest::Client::new())?;

    let store: Arc<dyn DocumentStore> = match &config.database_url {
        Some(url) => {
            let pool_config = PoolConfig::from_app_config(config);
            Arc::new(dsched_db::connect_store(url, pool_config).await?)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; run history will not be persisted");
            Arc::new(MemoryStore::new())
        }
    };
    let handler = ExecutionHandler::new(store, notifier_from_config(config)?);

    let result = handler.handle_fire(&job).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    match result.status() {
        JobStatus::Completed => Ok(()),
        status => anyhow::bail!(
            "job '{job_id}' {}: {}",
            status.as_str(),
            result.error().unwrap_or("no error recorded")
        ),
    }
}
