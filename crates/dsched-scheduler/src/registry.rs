//! Job registry: binds jobs to triggers and drives them with
//! `tokio-cron-scheduler`.
//!
//! Bindings live here, not in the engine. The engine is built on `start()`
//! from the current bindings and dropped on `shutdown()`, so a registry can
//! be stopped, edited and started again. Every job id behaves as
//! `max_instances = 1, coalesce = true`: a firing that arrives while the
//! previous one is still in the handler is dropped, even if the binding was
//! replaced in between.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use dsched_core::{JobPriority, JobResult, JobStatus};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_cron_scheduler::{Job as EngineJob, JobScheduler};
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::guard::RunGuard;
use crate::handler::ExecutionHandler;
use crate::job::Job;
use crate::trigger::Trigger;
use crate::SchedulerError;

const MAX_INSTANCES: u32 = 1;
const DEFAULT_MISFIRE_GRACE: Duration = Duration::from_secs(60);

type FireFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Read-only view of one binding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    pub priority: JobPriority,
    pub trigger: String,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub paused: bool,
    /// Registered but not yet handed to a running engine.
    pub pending: bool,
    /// A firing of this binding is in the handler right now.
    pub running: bool,
    pub coalesce: bool,
    pub max_instances: u32,
    pub misfire_grace_secs: u64,
    pub stats: RunStats,
}

/// Outcome counters for one job id, kept across re-registration.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub run_count: u64,
    pub completed_count: u64,
    pub failed_count: u64,
    pub cancelled_count: u64,
    /// Start of the most recent finished run.
    pub last_run: Option<DateTime<Utc>>,
    pub last_status: Option<JobStatus>,
    pub last_duration_ms: Option<i64>,
    pub last_error: Option<String>,
}

impl RunStats {
    fn record(&mut self, result: &JobResult) {
        self.run_count += 1;
        match result.status() {
            JobStatus::Completed => self.completed_count += 1,
            JobStatus::Failed => self.failed_count += 1,
            JobStatus::Cancelled => self.cancelled_count += 1,
        }
        self.last_run = Some(result.started_at());
        self.last_status = Some(result.status());
        self.last_duration_ms = result.duration().map(|d| d.num_milliseconds());
        self.last_error = result.error().map(str::to_string);
    }
}

/// Registry-wide counters, including job ids that have since been removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    pub run_count: u64,
    pub completed_count: u64,
    pub failed_count: u64,
    pub cancelled_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleSummary {
    pub is_running: bool,
    pub total_jobs: usize,
    pub active_jobs: usize,
    pub paused_jobs: usize,
    pub running_jobs: usize,
    pub running_job_ids: Vec<String>,
    pub totals: RunTotals,
    pub jobs: Vec<JobInfo>,
}

/// Per job id state that outlives any single binding.
#[derive(Default)]
struct JobSlot {
    firing: RunGuard,
    stats: Mutex<RunStats>,
}

impl JobSlot {
    fn stats(&self) -> MutexGuard<'_, RunStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Binding {
    job: Arc<Job>,
    trigger: Trigger,
    paused: AtomicBool,
    slot: Arc<JobSlot>,
    anchor: Mutex<DateTime<Utc>>,
    engine_id: Mutex<Option<Uuid>>,
}

impl Binding {
    fn new(job: Job, trigger: Trigger, slot: Arc<JobSlot>) -> Self {
        Self {
            job: Arc::new(job),
            trigger,
            paused: AtomicBool::new(false),
            slot,
            anchor: Mutex::new(Utc::now()),
            engine_id: Mutex::new(None),
        }
    }

    fn engine_id(&self) -> Option<Uuid> {
        *self.engine_id.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_engine_id(&self, id: Option<Uuid>) {
        *self.engine_id.lock().unwrap_or_else(PoisonError::into_inner) = id;
    }

    fn anchor(&self) -> DateTime<Utc> {
        *self.anchor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reset_anchor(&self) {
        *self.anchor.lock().unwrap_or_else(PoisonError::into_inner) = Utc::now();
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// `None` when the firing was skipped (paused) or coalesced (in flight).
    async fn fire(&self, handler: &ExecutionHandler, manual: bool) -> Option<JobResult> {
        if !manual && self.is_paused() {
            tracing::debug!(job = %self.job.id(), "scheduler: job paused; firing skipped");
            return None;
        }
        let Some(_permit) = self.slot.firing.try_acquire() else {
            tracing::warn!(
                job = %self.job.id(),
                "scheduler: previous firing still in flight; firing coalesced"
            );
            return None;
        };
        let result = handler.handle_fire(&self.job).await;
        self.slot.stats().record(&result);
        Some(result)
    }

    fn info(&self, misfire_grace: Duration) -> JobInfo {
        let paused = self.is_paused();
        let next_fire_time = if paused {
            None
        } else {
            self.trigger.next_fire_after(Utc::now(), self.anchor())
        };

        JobInfo {
            id: self.job.id().to_string(),
            name: self.job.name().to_string(),
            priority: self.job.policy().priority,
            trigger: self.trigger.describe(),
            next_fire_time,
            paused,
            pending: self.engine_id().is_none(),
            running: self.slot.firing.is_running(),
            coalesce: true,
            max_instances: MAX_INSTANCES,
            misfire_grace_secs: misfire_grace.as_secs(),
            stats: self.slot.stats().clone(),
        }
    }
}

pub struct JobRegistry {
    handler: Arc<ExecutionHandler>,
    timezone: Tz,
    misfire_grace: Duration,
    bindings: RwLock<HashMap<String, Arc<Binding>>>,
    /// Never pruned, so a firing of a removed or replaced binding still
    /// holds the id's guard.
    slots: Mutex<HashMap<String, Arc<JobSlot>>>,
    engine: tokio::sync::Mutex<Option<JobScheduler>>,
    running: AtomicBool,
    tracker: TaskTracker,
}

impl JobRegistry {
    pub fn new(handler: Arc<ExecutionHandler>, timezone: Tz) -> Self {
        Self {
            handler,
            timezone,
            misfire_grace: DEFAULT_MISFIRE_GRACE,
            bindings: RwLock::new(HashMap::new()),
            slots: Mutex::new(HashMap::new()),
            engine: tokio::sync::Mutex::new(None),
            running: AtomicBool::new(false),
            tracker: TaskTracker::new(),
        }
    }

    #[must_use]
    pub fn with_misfire_grace(mut self, grace: Duration) -> Self {
        self.misfire_grace = grace;
        self
    }

    #[must_use]
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    #[must_use]
    pub fn handler(&self) -> &Arc<ExecutionHandler> {
        &self.handler
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Bind `job` to a trigger of `kind` built from `args`, replacing any
    /// binding with the same id.
    ///
    /// Returns `None` (and logs) if the trigger is invalid or the engine
    /// rejects it; the registry is left unchanged in that case.
    pub async fn add_job(
        &self,
        job: Job,
        kind: &str,
        args: &Map<String, Value>,
    ) -> Option<JobInfo> {
        match Trigger::from_kind(kind, args, self.timezone) {
            Ok(trigger) => self.add_job_with_trigger(job, trigger).await,
            Err(e) => {
                tracing::error!(job = %job.id(), kind, error = %e, "scheduler: rejected job trigger");
                None
            }
        }
    }

    pub async fn add_job_with_trigger(&self, job: Job, trigger: Trigger) -> Option<JobInfo> {
        let engine = self.engine.lock().await;
        let job_id = job.id().to_string();
        let binding = Arc::new(Binding::new(job, trigger, self.slot(&job_id)));

        if let Some(scheduler) = engine.as_ref() {
            match self.schedule(scheduler, &binding).await {
                Ok(engine_id) => binding.set_engine_id(Some(engine_id)),
                Err(e) => {
                    tracing::error!(job = %job_id, error = %e, "scheduler: engine rejected job");
                    return None;
                }
            }
        }

        let previous = self
            .bindings_write()
            .insert(job_id.clone(), Arc::clone(&binding));

        if let Some(previous) = previous {
            tracing::info!(job = %job_id, "scheduler: replacing existing binding");
            if let (Some(scheduler), Some(engine_id)) = (engine.as_ref(), previous.engine_id()) {
                if let Err(e) = scheduler.remove(&engine_id).await {
                    tracing::warn!(job = %job_id, error = %e, "scheduler: failed to drop replaced binding");
                }
            }
        }

        let info = binding.info(self.misfire_grace);
        tracing::info!(
            job = %job_id,
            trigger = %info.trigger,
            next_fire_time = ?info.next_fire_time,
            "scheduler: job registered"
        );
        Some(info)
    }

    /// Unbind and forget a job. `false` if the id is unknown or the engine
    /// refused the removal.
    pub async fn remove_job(&self, job_id: &str) -> bool {
        let engine = self.engine.lock().await;
        let Some(binding) = self.binding(job_id) else {
            tracing::debug!(job = %job_id, "scheduler: remove of unknown job");
            return false;
        };

        if let (Some(scheduler), Some(engine_id)) = (engine.as_ref(), binding.engine_id()) {
            if let Err(e) = scheduler.remove(&engine_id).await {
                tracing::warn!(job = %job_id, error = %e, "scheduler: failed to remove job");
                return false;
            }
        }

        self.bindings_write().remove(job_id);
        tracing::info!(job = %job_id, "scheduler: job removed");
        true
    }

    pub fn pause_job(&self, job_id: &str) -> bool {
        self.set_paused(job_id, true)
    }

    pub fn resume_job(&self, job_id: &str) -> bool {
        self.set_paused(job_id, false)
    }

    fn set_paused(&self, job_id: &str, paused: bool) -> bool {
        let Some(binding) = self.binding(job_id) else {
            return false;
        };
        binding.paused.store(paused, Ordering::Release);
        tracing::info!(
            job = %job_id,
            "scheduler: job {}",
            if paused { "paused" } else { "resumed" }
        );
        true
    }

    #[must_use]
    pub fn get_job_info(&self, job_id: &str) -> Option<JobInfo> {
        self.binding(job_id).map(|b| b.info(self.misfire_grace))
    }

    #[must_use]
    pub fn get_schedule_summary(&self) -> ScheduleSummary {
        let mut jobs: Vec<JobInfo> = self
            .bindings_read()
            .values()
            .map(|b| b.info(self.misfire_grace))
            .collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));

        let paused_jobs = jobs.iter().filter(|j| j.paused || j.pending).count();
        let running_job_ids: Vec<String> = jobs
            .iter()
            .filter(|j| j.running)
            .map(|j| j.id.clone())
            .collect();
        ScheduleSummary {
            is_running: self.is_running(),
            total_jobs: jobs.len(),
            active_jobs: jobs.len() - paused_jobs,
            paused_jobs,
            running_jobs: running_job_ids.len(),
            running_job_ids,
            totals: self.totals(),
            jobs,
        }
    }

    /// Fire a job immediately through the same coalescing path the engine
    /// uses, ignoring the paused flag.
    ///
    /// The firing runs on its own tracked task: dropping the returned future
    /// stops the wait, not the run, and the outcome is still recorded.
    ///
    /// `None` if the id is unknown or a firing is already in flight.
    pub async fn run_now(&self, job_id: &str) -> Option<JobResult> {
        let binding = self.binding(job_id)?;
        tracing::info!(job = %job_id, "scheduler: manual run requested");
        let handler = Arc::clone(&self.handler);
        let firing = self
            .tracker
            .spawn(async move { binding.fire(&handler, true).await });
        match firing.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(job = %job_id, error = %e, "scheduler: manual run task failed");
                None
            }
        }
    }

    #[must_use]
    pub fn recent_results(&self) -> Vec<JobResult> {
        self.handler.recent_results()
    }

    /// Build the engine from the current bindings and start it. A no-op if
    /// already running.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] if the engine cannot be created, a binding
    /// cannot be scheduled, or the engine fails to start. The registry stays
    /// stopped in that case.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut engine = self.engine.lock().await;
        if engine.is_some() {
            tracing::debug!("scheduler: start requested but already running");
            return Ok(());
        }

        let mut scheduler = JobScheduler::new().await?;
        let bindings = self.snapshot();

        if let Err(e) = self.schedule_all(&scheduler, &bindings).await {
            for binding in &bindings {
                binding.set_engine_id(None);
            }
            if let Err(shutdown_err) = scheduler.shutdown().await {
                tracing::warn!(error = %shutdown_err, "scheduler: failed to discard engine");
            }
            return Err(e);
        }

        *engine = Some(scheduler);
        self.running.store(true, Ordering::Release);
        tracing::info!(
            jobs = bindings.len(),
            timezone = %self.timezone.name(),
            "scheduler: started"
        );
        Ok(())
    }

    /// Stop firing. With `wait`, also wait for in-flight runs started by
    /// this registry to finish. A no-op if not running.
    pub async fn shutdown(&self, wait: bool) {
        let mut engine = self.engine.lock().await;
        let Some(mut scheduler) = engine.take() else {
            tracing::debug!("scheduler: shutdown requested but not running");
            return;
        };

        self.running.store(false, Ordering::Release);
        for binding in self.snapshot() {
            binding.set_engine_id(None);
        }
        if let Err(e) = scheduler.shutdown().await {
            tracing::warn!(error = %e, "scheduler: engine shutdown reported an error");
        }
        drop(engine);

        if wait {
            let in_flight = self.tracker.len();
            if in_flight > 0 {
                tracing::info!(in_flight, "scheduler: waiting for running jobs");
            }
            self.tracker.close();
            self.tracker.wait().await;
            self.tracker.reopen();
        }
        tracing::info!(wait, "scheduler: stopped");
    }

    async fn schedule_all(
        &self,
        scheduler: &JobScheduler,
        bindings: &[Arc<Binding>],
    ) -> Result<(), SchedulerError> {
        for binding in bindings {
            let engine_id = self.schedule(scheduler, binding).await?;
            binding.set_engine_id(Some(engine_id));
        }
        scheduler.start().await?;
        Ok(())
    }

    async fn schedule(
        &self,
        scheduler: &JobScheduler,
        binding: &Arc<Binding>,
    ) -> Result<Uuid, SchedulerError> {
        let engine_job = self.engine_job(binding)?;
        binding.reset_anchor();
        Ok(scheduler.add(engine_job).await?)
    }

    fn engine_job(&self, binding: &Arc<Binding>) -> Result<EngineJob, SchedulerError> {
        let callback = {
            let binding = Arc::clone(binding);
            let handler = Arc::clone(&self.handler);
            let tracker = self.tracker.clone();
            move |_id: Uuid, _scheduler: JobScheduler| -> FireFuture {
                let binding = Arc::clone(&binding);
                let handler = Arc::clone(&handler);
                Box::pin(tracker.track_future(async move {
                    binding.fire(&handler, false).await;
                }))
            }
        };

        let job = match &binding.trigger {
            Trigger::Cron {
                expression,
                timezone,
                ..
            } => EngineJob::new_async_tz(expression.as_str(), *timezone, callback)
                .map_err(|e| SchedulerError::InvalidCron(format!("'{expression}': {e}")))?,
            Trigger::Interval { every } => {
                // the engine keeps whole seconds and would silently drop the rest
                if every.subsec_nanos() != 0 || every.is_zero() {
                    return Err(SchedulerError::InvalidTrigger(format!(
                        "interval of {every:?} is not a whole number of seconds"
                    )));
                }
                EngineJob::new_repeated_async(*every, callback)?
            }
        };
        Ok(job)
    }

    fn binding(&self, job_id: &str) -> Option<Arc<Binding>> {
        self.bindings_read().get(job_id).cloned()
    }

    fn slot(&self, job_id: &str) -> Arc<JobSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(job_id.to_string()).or_default())
    }

    fn totals(&self) -> RunTotals {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.values().fold(RunTotals::default(), |mut totals, slot| {
            let stats = slot.stats();
            totals.run_count += stats.run_count;
            totals.completed_count += stats.completed_count;
            totals.failed_count += stats.failed_count;
            totals.cancelled_count += stats.cancelled_count;
            totals
        })
    }

    fn snapshot(&self) -> Vec<Arc<Binding>> {
        self.bindings_read().values().cloned().collect()
    }

    fn bindings_read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Binding>>> {
        self.bindings.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn bindings_write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Binding>>> {
        self.bindings.write().unwrap_or_else(PoisonError::into_inner)
    }
}
