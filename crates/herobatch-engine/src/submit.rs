use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use herobatch_contracts::batch::{write_batch_artifact, BatchJob, BatchState, GenerationRequest};
use herobatch_contracts::runs::events::{EventLog, EventPayload};
use serde_json::Value;

use crate::poll::{PollOutcome, PollPolicy, PollStep};
use crate::services::{error_chain_text, GenerationService};

pub const BATCH_ARTIFACT_MIME: &str = "application/jsonl";
pub const MAX_CONSECUTIVE_POLL_ERRORS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedBatch {
    pub job: BatchJob,
    pub keys: Vec<String>,
}

/// How the wait for a batch job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    Succeeded { job: BatchJob, result_file: String },
    Failed { job: BatchJob, detail: String },
    TimedOut {
        job_name: String,
        last_state: String,
        elapsed: Duration,
    },
}

pub struct BatchSubmitter<'a> {
    service: &'a dyn GenerationService,
    events: &'a EventLog,
    model: &'a str,
    display_name: &'a str,
    poll: PollPolicy,
}

impl<'a> BatchSubmitter<'a> {
    pub fn new(
        service: &'a dyn GenerationService,
        events: &'a EventLog,
        model: &'a str,
        display_name: &'a str,
        poll: PollPolicy,
    ) -> Self {
        Self {
            service,
            events,
            model,
            display_name,
            poll,
        }
    }

    /// Writes the JSONL artifact, uploads it and creates one batch job.
    pub fn submit(
        &self,
        artifact_path: &Path,
        requests: &[GenerationRequest],
    ) -> Result<SubmittedBatch> {
        if requests.is_empty() {
            bail!("refusing to submit an empty batch");
        }
        write_batch_artifact(artifact_path, requests)?;
        let uploaded = self
            .service
            .upload_file(artifact_path, BATCH_ARTIFACT_MIME, self.display_name)
            .with_context(|| format!("failed to upload batch artifact {}", artifact_path.display()))?;
        let job = self
            .service
            .create_batch(self.model, &uploaded.name, self.display_name)
            .with_context(|| format!("failed to create batch job on {}", self.model))?;

        tracing::info!(
            job = %job.name,
            requests = requests.len(),
            model = self.model,
            "batch submitted"
        );
        let mut payload = EventPayload::new();
        payload.insert("job".to_string(), Value::String(job.name.clone()));
        payload.insert("model".to_string(), Value::String(self.model.to_string()));
        payload.insert("source_file".to_string(), Value::String(uploaded.name.clone()));
        payload.insert("requests".to_string(), Value::from(requests.len() as u64));
        self.events.emit("batch_submitted", payload)?;

        Ok(SubmittedBatch {
            job,
            keys: requests.iter().map(|request| request.key.clone()).collect(),
        })
    }

    /// Polls until the job is terminal or the policy ceiling passes.
    ///
    /// Transport errors while polling are retried on the next tick; only a
    /// run of `MAX_CONSECUTIVE_POLL_ERRORS` of them is an error.
    pub fn wait(&self, submitted: &SubmittedBatch) -> Result<BatchOutcome> {
        let job_name = submitted.job.name.clone();
        let mut consecutive_errors = 0u32;
        let mut last_seen: Option<BatchState> = None;

        let outcome = self.poll.wait(|attempt| {
            let job = match self.service.get_batch(&job_name) {
                Ok(job) => {
                    consecutive_errors = 0;
                    job
                }
                Err(err) => {
                    consecutive_errors += 1;
                    if consecutive_errors >= MAX_CONSECUTIVE_POLL_ERRORS {
                        return Err(err.context(format!(
                            "polling {job_name} failed {consecutive_errors} times in a row"
                        )));
                    }
                    tracing::warn!(
                        job = %job_name,
                        attempt,
                        error = %error_chain_text(&err, 300),
                        "batch poll failed; retrying"
                    );
                    return Ok(PollStep::Waiting("POLL_ERROR".to_string()));
                }
            };
            if last_seen.as_ref() != Some(&job.state) {
                tracing::info!(job = %job_name, state = %job.state, attempt, "batch state");
                let mut payload = EventPayload::new();
                payload.insert("job".to_string(), Value::String(job_name.clone()));
                payload.insert("state".to_string(), Value::String(job.state.to_string()));
                payload.insert("attempt".to_string(), Value::from(attempt));
                self.events.emit("batch_state", payload)?;
                last_seen = Some(job.state.clone());
            }
            if job.state.is_terminal() {
                Ok(PollStep::Done(job))
            } else {
                Ok(PollStep::Waiting(job.state.to_string()))
            }
        })?;

        Ok(match outcome {
            PollOutcome::Ready(job) => classify_terminal(job),
            PollOutcome::TimedOut {
                elapsed,
                last_state,
                ..
            } => BatchOutcome::TimedOut {
                job_name,
                last_state,
                elapsed,
            },
        })
    }
}

fn classify_terminal(job: BatchJob) -> BatchOutcome {
    if job.state != BatchState::Succeeded {
        let detail = job
            .error
            .clone()
            .unwrap_or_else(|| format!("batch ended in state {}", job.state));
        return BatchOutcome::Failed { job, detail };
    }
    match job.result_file.clone() {
        Some(result_file) => BatchOutcome::Succeeded { job, result_file },
        None => BatchOutcome::Failed {
            job,
            detail: "batch succeeded without a result file".to_string(),
        },
    }
}
