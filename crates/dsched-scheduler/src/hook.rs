//! Generic HTTP hook payload and job construction from YAML definitions.
//!
//! Concrete business logic lives behind HTTP endpoints; a job definition
//! names the endpoint in its `options` and the runtime supervises the call.

use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use dsched_core::{JobDefinition, JobOutput};
use reqwest::{Method, Url};
use serde_json::{Map, Value};

use crate::job::{Job, JobContext, Work};
use crate::SchedulerError;

/// Characters of a failing response body kept in the error message.
const ERROR_BODY_PREVIEW: usize = 200;

#[derive(Debug, Clone)]
pub struct HttpHookWork {
    client: reqwest::Client,
    url: Url,
    method: Method,
    body: Option<Value>,
}

impl HttpHookWork {
    /// Read `url`, `method` and `body` from job options.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidJob`] if `url` is missing or not an
    /// absolute http(s) URL, or `method` is not GET, POST or PUT.
    pub fn from_options(
        client: reqwest::Client,
        options: &Map<String, Value>,
    ) -> Result<Self, SchedulerError> {
        let raw_url = options
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| SchedulerError::InvalidJob("options.url is required".to_string()))?;
        let url = Url::parse(raw_url)
            .map_err(|e| SchedulerError::InvalidJob(format!("invalid url '{raw_url}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SchedulerError::InvalidJob(format!(
                "unsupported url scheme '{}'",
                url.scheme()
            )));
        }

        let method = match options.get("method") {
            None => Method::POST,
            Some(Value::String(m)) => match m.to_ascii_uppercase().as_str() {
                "GET" => Method::GET,
                "POST" => Method::POST,
                "PUT" => Method::PUT,
                other => {
                    return Err(SchedulerError::InvalidJob(format!(
                        "unsupported method '{other}'; expected GET, POST or PUT"
                    )))
                }
            },
            Some(other) => {
                return Err(SchedulerError::InvalidJob(format!(
                    "options.method must be a string, got {other}"
                )))
            }
        };

        Ok(Self {
            client,
            url,
            method,
            body: options.get("body").cloned(),
        })
    }
}

#[async_trait]
impl Work for HttpHookWork {
    async fn execute(&self, ctx: &JobContext<'_>) -> anyhow::Result<JobOutput> {
        let mut request = self
            .client
            .request(self.method.clone(), self.url.clone())
            .header("x-dsched-job-id", ctx.job_id)
            .header("x-dsched-attempt", ctx.attempt.to_string());
        if let Some(body) = &self.body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("{} {} failed", self.method, self.url))?;
        let status = response.status();
        if !status.is_success() {
            let preview = body_preview(response).await;
            bail!("hook returned HTTP {status}: {preview}");
        }

        let text = response
            .text()
            .await
            .context("failed to read hook response body")?;

        let result = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(JobOutput::new()
            .with_result(result)
            .with_statistic("status_code", status.as_u16()))
    }
}

/// Leading [`ERROR_BODY_PREVIEW`] characters of a failed response. Stops
/// reading once enough bytes for that many characters have arrived, so a
/// large error page is never buffered whole.
async fn body_preview(mut response: reqwest::Response) -> String {
    let byte_cap = ERROR_BODY_PREVIEW * 4;
    let mut bytes = Vec::new();
    while bytes.len() < byte_cap {
        match response.chunk().await {
            Ok(Some(chunk)) => bytes.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "scheduler: error body unreadable");
                break;
            }
        }
    }
    bytes.truncate(byte_cap);
    String::from_utf8_lossy(&bytes)
        .chars()
        .take(ERROR_BODY_PREVIEW)
        .collect()
}

/// Build a runnable [`Job`] from a YAML definition.
///
/// # Errors
///
/// Returns [`SchedulerError::InvalidJob`] if the hook options are invalid.
pub fn job_from_definition(
    definition: &JobDefinition,
    client: &reqwest::Client,
) -> Result<Job, SchedulerError> {
    let work =
        HttpHookWork::from_options(client.clone(), &definition.options).map_err(|e| match e {
            SchedulerError::InvalidJob(msg) => {
                SchedulerError::InvalidJob(format!("job '{}': {msg}", definition.id))
            }
            other => other,
        })?;

    Ok(Job::new(&definition.id, &definition.name, Arc::new(work))
        .with_policy(definition.policy())
        .with_options(definition.options.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn defaults_to_post_without_body() {
        let work = HttpHookWork::from_options(
            reqwest::Client::new(),
            &options(json!({ "url": "http://localhost:8080/hooks/sync" })),
        )
        .unwrap();
        assert_eq!(work.method, Method::POST);
        assert!(work.body.is_none());
    }

    #[test]
    fn accepts_lowercase_method_and_body() {
        let work = HttpHookWork::from_options(
            reqwest::Client::new(),
            &options(json!({
                "url": "https://example.com/hooks/report",
                "method": "put",
                "body": { "format": "xlsx" }
            })),
        )
        .unwrap();
        assert_eq!(work.method, Method::PUT);
        assert_eq!(work.body, Some(json!({ "format": "xlsx" })));
    }

    #[test]
    fn rejects_missing_or_bad_url() {
        let client = reqwest::Client::new();
        assert!(matches!(
            HttpHookWork::from_options(client.clone(), &Map::new()),
            Err(SchedulerError::InvalidJob(_))
        ));
        assert!(matches!(
            HttpHookWork::from_options(client.clone(), &options(json!({ "url": "not a url" }))),
            Err(SchedulerError::InvalidJob(_))
        ));
        assert!(matches!(
            HttpHookWork::from_options(client, &options(json!({ "url": "ftp://example.com/x" }))),
            Err(SchedulerError::InvalidJob(_))
        ));
    }

    #[test]
    fn rejects_unsupported_method() {
        let err = HttpHookWork::from_options(
            reqwest::Client::new(),
            &options(json!({ "url": "http://localhost/x", "method": "DELETE" })),
        )
        .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidJob(ref m) if m.contains("DELETE")));
    }

    #[test]
    fn definition_policy_and_options_carry_over() {
        let file = dsched_core::parse_jobs_file(
            r"
jobs:
  - id: report_generation
    name: Daily report
    retry_count: 2
    timeout_secs: 120
    trigger: { kind: cron, fields: { hour: 7 } }
    options: { url: 'http://localhost:8080/hooks/report' }
",
        )
        .unwrap();
        let job = job_from_definition(&file.jobs[0], &reqwest::Client::new()).unwrap();
        assert_eq!(job.id(), "report_generation");
        assert_eq!(job.name(), "Daily report");
        assert_eq!(job.policy().retry_count, 2);
        assert_eq!(job.policy().timeout.as_secs(), 120);
        assert_eq!(job.options()["url"], "http://localhost:8080/hooks/report");
    }

    #[test]
    fn definition_without_url_names_the_job() {
        let file = dsched_core::parse_jobs_file(
            r"
jobs:
  - id: order_sync
    name: Order sync
    trigger: { kind: interval, fields: { minutes: 30 } }
",
        )
        .unwrap();
        let err = job_from_definition(&file.jobs[0], &reqwest::Client::new()).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidJob(ref m) if m.contains("order_sync")));
    }
}
