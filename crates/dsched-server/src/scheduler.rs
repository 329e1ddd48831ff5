//! Background job registry wiring.
//!
//! Builds the [`JobRegistry`] at server startup from the app config and the
//! job definitions file. Definitions that fail to build or bind are logged
//! and skipped so one bad entry does not keep the daemon down.

use std::sync::Arc;
use std::time::Duration;

use dsched_core::{AppConfig, JobsFile};
use dsched_db::DocumentStore;
use dsched_scheduler::{job_from_definition, notifier_from_config, ExecutionHandler, JobRegistry};

/// Builds the registry and registers every enabled definition. The registry
/// is returned stopped; the caller starts it.
///
/// # Errors
///
/// Returns an error if the failure notifier cannot be built.
pub async fn build_registry(
    config: &AppConfig,
    store: Arc<dyn DocumentStore>,
    jobs: &JobsFile,
) -> anyhow::Result<Arc<JobRegistry>> {
    let notifier = notifier_from_config(config)?;
    let handler = Arc::new(
        ExecutionHandler::new(store, notifier).with_memory_limit(config.history_memory_limit),
    );
    let registry = Arc::new(
        JobRegistry::new(handler, config.timezone)
            .with_misfire_grace(Duration::from_secs(config.misfire_grace_secs)),
    );

    let client = reqwest::Client::new();
    register_jobs(&registry, jobs, &client).await;
    Ok(registry)
}

/// Returns the number of bindings created.
pub async fn register_jobs(
    registry: &JobRegistry,
    jobs: &JobsFile,
    client: &reqwest::Client,
) -> usize {
    let mut registered = 0;
    let mut disabled = 0;

    for definition in &jobs.jobs {
        if !definition.enabled {
            tracing::info!(job = %definition.id, "scheduler: job disabled; not registered");
            disabled += 1;
            continue;
        }

        let job = match job_from_definition(definition, client) {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(job = %definition.id, error = %e, "scheduler: invalid job definition");
                continue;
            }
        };

        if registry
            .add_job(job, &definition.trigger.kind, &definition.trigger.fields)
            .await
            .is_some()
        {
            registered += 1;
        }
    }

    tracing::info!(
        registered,
        disabled,
        total = jobs.jobs.len(),
        "scheduler: job definitions loaded"
    );
    registered
}
