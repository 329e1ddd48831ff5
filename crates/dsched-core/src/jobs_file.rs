//! YAML job definitions: which jobs exist, how they are triggered, and their
//! retry/timeout policy.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{
    JobPolicy, JobPriority, DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY_SECS, DEFAULT_TIMEOUT_SECS,
};
use crate::ConfigError;

/// Raw trigger specification. `kind` and `fields` are checked when the job is
/// registered, not when the file is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSpec {
    pub kind: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    pub trigger: TriggerSpec,
    #[serde(default)]
    pub options: Map<String, Value>,
}

fn default_enabled() -> bool {
    true
}

fn default_retry_count() -> u32 {
    DEFAULT_RETRY_COUNT
}

fn default_retry_delay_secs() -> u64 {
    DEFAULT_RETRY_DELAY_SECS
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl JobDefinition {
    #[must_use]
    pub fn policy(&self) -> JobPolicy {
        JobPolicy {
            priority: self.priority,
            retry_count: self.retry_count,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsFile {
    #[serde(default)]
    pub jobs: Vec<JobDefinition>,
}

impl JobsFile {
    pub fn enabled(&self) -> impl Iterator<Item = &JobDefinition> {
        self.jobs.iter().filter(|j| j.enabled)
    }

    #[must_use]
    pub fn find(&self, id: &str) -> Option<&JobDefinition> {
        self.jobs.iter().find(|j| j.id == id)
    }
}

/// Load and validate job definitions from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_jobs_file(path: &Path) -> Result<JobsFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::JobsFileIo {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_jobs_file(&content)
}

/// Parse and validate job definitions from YAML text.
///
/// # Errors
///
/// Returns `ConfigError` if the YAML is malformed or fails validation.
pub fn parse_jobs_file(content: &str) -> Result<JobsFile, ConfigError> {
    let jobs_file: JobsFile = serde_yaml::from_str(content)?;
    validate_jobs(&jobs_file)?;
    Ok(jobs_file)
}

fn validate_jobs(jobs_file: &JobsFile) -> Result<(), ConfigError> {
    let mut seen_ids = HashSet::new();

    for job in &jobs_file.jobs {
        if job.id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "job id must be non-empty".to_string(),
            ));
        }

        if job.name.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "job '{}' must have a non-empty name",
                job.id
            )));
        }

        if job.retry_count == 0 {
            return Err(ConfigError::Validation(format!(
                "job '{}' has retry_count 0; must be at least 1",
                job.id
            )));
        }

        if job.timeout_secs == 0 {
            return Err(ConfigError::Validation(format!(
                "job '{}' has timeout_secs 0; must be positive",
                job.id
            )));
        }

        if !seen_ids.insert(job.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate job id: '{}'",
                job.id
            )));
        }
    }

    Ok(())
}
