pub mod app_config;
pub mod config;
pub mod jobs_file;
pub mod types;

use thiserror::Error;

pub use app_config::{AppConfig, Environment};
pub use config::{load_app_config, load_app_config_from_env};
pub use jobs_file::{load_jobs_file, parse_jobs_file, JobDefinition, JobsFile, TriggerSpec};
pub use types::{
    HistoryRecord, JobOutput, JobPolicy, JobPriority, JobResult, JobStatus, ParseStatusError,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read jobs file {path}: {source}")]
    JobsFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse jobs file: {0}")]
    JobsFileParse(#[from] serde_yaml::Error),

    #[error("jobs file validation failed: {0}")]
    Validation(String),
}
