use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::domain::Category;
use crate::error::HarvestError;
use crate::paginator::SearchQuery;
use crate::pipeline::{HarvestJob, Harvester, RunOutcome};
use crate::session::BeatmapSite;
use crate::upload::ObjectStore;

/// A list of harvest jobs run back to back, e.g. from a daily scheduler.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchSpec {
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    pub jobs: Vec<JobSpec>,
}

fn default_cooldown_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobSpec {
    pub category: Category,
    pub limit: usize,
    /// Extra search parameters; non-string values are sent in their JSON form.
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
}

impl JobSpec {
    pub fn to_job(&self) -> HarvestJob {
        let query = self
            .params
            .iter()
            .fold(SearchQuery::new(), |query, (key, value)| {
                let value = match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                query.with(key.clone(), value)
            });
        HarvestJob {
            category: self.category.clone(),
            query,
            limit: self.limit,
        }
    }
}

impl BatchSpec {
    pub fn load(path: &Path) -> Result<Self, HarvestError> {
        let content =
            fs::read_to_string(path).map_err(|_| HarvestError::ConfigRead(path.to_path_buf()))?;
        let spec: BatchSpec = serde_json::from_str(&content)
            .map_err(|err| HarvestError::ConfigParse(err.to_string()))?;
        if spec.max_attempts == 0 {
            return Err(HarvestError::ConfigParse(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(spec)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub category: String,
    pub attempts: u32,
    pub outcome: Option<RunOutcome>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub jobs: Vec<JobReport>,
}

impl BatchReport {
    pub fn all_completed(&self) -> bool {
        self.jobs
            .iter()
            .all(|job| matches!(job.outcome, Some(RunOutcome::Completed { .. })))
    }
}

/// Runs every job in order.
///
/// A job whose run aborts is retried after the cooldown, up to
/// `max_attempts` runs. Authentication failures stop the batch; any other
/// job error is recorded and the batch moves on.
pub fn run_batch<S: BeatmapSite, O: ObjectStore>(
    harvester: &Harvester<S, O>,
    spec: &BatchSpec,
) -> Result<BatchReport, HarvestError> {
    let mut report = BatchReport::default();
    for (index, job_spec) in spec.jobs.iter().enumerate() {
        let job = job_spec.to_job();
        info!(job = index + 1, total = spec.jobs.len(), category = %job.category, "batch job started");

        let mut attempts = 0u32;
        let job_report = loop {
            attempts += 1;
            match harvester.harvest(&job) {
                Ok(outcome) if outcome.is_aborted() && attempts < spec.max_attempts => {
                    warn!(
                        attempts,
                        cooldown_secs = spec.cooldown_secs,
                        "run aborted, retrying after cooldown"
                    );
                    thread::sleep(spec.cooldown());
                }
                Ok(outcome) => {
                    break JobReport {
                        category: job.category.to_string(),
                        attempts,
                        outcome: Some(outcome),
                        error: None,
                    };
                }
                Err(err) if err.is_auth() => return Err(err),
                Err(err) => {
                    error!(category = %job.category, %err, "batch job failed");
                    break JobReport {
                        category: job.category.to_string(),
                        attempts,
                        outcome: None,
                        error: Some(err.to_string()),
                    };
                }
            }
        };
        report.jobs.push(job_report);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_params_override_default_sort() {
        let spec: JobSpec = serde_json::from_str(
            r#"{"category": "anime", "limit": 50, "params": {"g": 3, "s": "any", "sort": "rating_desc"}}"#,
        )
        .unwrap();
        let job = spec.to_job();
        assert_eq!(job.limit, 50);
        assert_eq!(
            job.query.params(),
            &[
                ("sort".to_string(), "rating_desc".to_string()),
                ("g".to_string(), "3".to_string()),
                ("s".to_string(), "any".to_string()),
            ]
        );
    }

    #[test]
    fn batch_defaults() {
        let spec: BatchSpec =
            serde_json::from_str(r#"{"jobs": [{"category": "miku", "limit": 15}]}"#).unwrap();
        assert_eq!(spec.cooldown_secs, 60);
        assert_eq!(spec.max_attempts, 3);
        assert_eq!(spec.jobs[0].to_job().query, SearchQuery::new());
    }
}
