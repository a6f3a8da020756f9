use std::path::PathBuf;

use anyhow::{Context, Result};
use herobatch_contracts::batch::GenerationRequest;
use herobatch_contracts::records::FailureReason;
use herobatch_contracts::runs::events::{EventLog, EventPayload};
use herobatch_contracts::runs::ledger::{LedgerWrite, SkipLedger};
use herobatch_contracts::runs::summary::{now_utc_iso, write_summary, RunSummary};
use serde_json::Value;
use uuid::Uuid;

use crate::builder::RequestBuilder;
use crate::config::PipelineConfig;
use crate::fetch::{AssetFetcher, AssetSource};
use crate::loader::{load_products, ProductTable};
use crate::reconcile::{record_skip, Reconciler, SavedImage};
use crate::services::{error_chain_text, GenerationService};
use crate::submit::{BatchOutcome, BatchSubmitter};

/// Where the batch stage ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatus {
    NotSubmitted,
    Succeeded,
    Failed { state: String, detail: String },
    TimedOut { last_state: String },
}

impl BatchStatus {
    pub fn label(&self) -> &str {
        match self {
            BatchStatus::NotSubmitted => "NOT_SUBMITTED",
            BatchStatus::Succeeded => "SUCCEEDED",
            BatchStatus::Failed { state, .. } => state.as_str(),
            BatchStatus::TimedOut { .. } => "TIMED_OUT",
        }
    }

    pub fn is_whole_batch_failure(&self) -> bool {
        matches!(self, BatchStatus::Failed { .. } | BatchStatus::TimedOut { .. })
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: RunSummary,
    pub batch_status: BatchStatus,
    pub saved: Vec<SavedImage>,
    pub ledger: SkipLedger,
    pub skip_report: Option<PathBuf>,
}

struct Settled {
    status: BatchStatus,
    job: Option<String>,
    saved: Vec<SavedImage>,
}

/// Load, fetch, build, submit, reconcile, then write the skip report.
pub struct BatchPipeline<'a> {
    config: &'a PipelineConfig,
    service: &'a dyn GenerationService,
    fetcher: AssetFetcher,
}

impl<'a> BatchPipeline<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        service: &'a dyn GenerationService,
        source: Box<dyn AssetSource>,
    ) -> Self {
        Self {
            fetcher: AssetFetcher::new(source, config.tmp_dir()),
            config,
            service,
        }
    }

    pub fn run(self) -> Result<RunReport> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = now_utc_iso();
        let table = load_products(&self.config.input_path, &self.config.columns)?;
        let events = EventLog::new(self.config.events_path(), run_id.clone());

        tracing::info!(
            run_id = %run_id,
            rows = table.len(),
            service = self.service.name(),
            model = %self.config.model,
            "run started"
        );
        let mut payload = EventPayload::new();
        payload.insert(
            "input".to_string(),
            Value::String(self.config.input_path.to_string_lossy().to_string()),
        );
        payload.insert("rows".to_string(), Value::from(table.len() as u64));
        payload.insert(
            "service".to_string(),
            Value::String(self.service.name().to_string()),
        );
        payload.insert("model".to_string(), Value::String(self.config.model.clone()));
        events.emit("run_started", payload)?;

        let mut ledger = SkipLedger::new(table.columns().to_vec());
        let requests = self.build_requests(&table, &events, &mut ledger)?;

        let settled = match self.settle_batch(&table, &requests, &events, &mut ledger) {
            Ok(settled) => settled,
            Err(err) => {
                tracing::error!(
                    error = %error_chain_text(&err, 400),
                    "run aborted; flushing skip report"
                );
                let skip_report = match self.write_ledger(&ledger, &events) {
                    Ok(path) => path,
                    Err(flush_err) => {
                        tracing::error!(error = %flush_err, "failed to flush skip report");
                        None
                    }
                };
                let summary = RunSummary {
                    run_id,
                    started_at,
                    finished_at: now_utc_iso(),
                    input_rows: table.len() as u64,
                    submitted: requests.len() as u64,
                    produced: 0,
                    skipped: ledger.loaded_len() as u64,
                    unmatched_results: (ledger.len() - ledger.loaded_len()) as u64,
                    batch_status: "ERROR".to_string(),
                    batch_job: None,
                    skip_report: skip_report.map(|path| path.to_string_lossy().to_string()),
                    skipped_by_reason: ledger.counts_by_reason(),
                };
                if let Err(summary_err) = write_summary(&self.config.summary_path(), &summary) {
                    tracing::error!(error = %summary_err, "failed to write run summary");
                }
                return Err(err);
            }
        };

        let skip_report = self.write_ledger(&ledger, &events)?;
        let produced = settled
            .saved
            .iter()
            .filter(|image| table.get(&image.key).is_some())
            .count();
        let unmatched = (settled.saved.len() - produced) + (ledger.len() - ledger.loaded_len());
        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: now_utc_iso(),
            input_rows: table.len() as u64,
            submitted: requests.len() as u64,
            produced: produced as u64,
            skipped: ledger.loaded_len() as u64,
            unmatched_results: unmatched as u64,
            batch_status: settled.status.label().to_string(),
            batch_job: settled.job.clone(),
            skip_report: skip_report
                .as_ref()
                .map(|path| path.to_string_lossy().to_string()),
            skipped_by_reason: ledger.counts_by_reason(),
        };
        write_summary(&self.config.summary_path(), &summary)?;

        if !summary.is_complete() {
            tracing::error!(
                rows = summary.input_rows,
                produced = summary.produced,
                skipped = summary.skipped,
                "some records have no outcome"
            );
        }
        tracing::info!(
            produced = summary.produced,
            skipped = summary.skipped,
            batch = %summary.batch_status,
            "run finished"
        );
        let mut payload = EventPayload::new();
        payload.insert("produced".to_string(), Value::from(summary.produced));
        payload.insert("skipped".to_string(), Value::from(summary.skipped));
        payload.insert(
            "unmatched_results".to_string(),
            Value::from(summary.unmatched_results),
        );
        payload.insert(
            "batch_status".to_string(),
            Value::String(summary.batch_status.clone()),
        );
        payload.insert("complete".to_string(), Value::Bool(summary.is_complete()));
        events.emit("run_finished", payload)?;

        Ok(RunReport {
            summary,
            batch_status: settled.status,
            saved: settled.saved,
            ledger,
            skip_report,
        })
    }

    fn build_requests(
        &self,
        table: &ProductTable,
        events: &EventLog,
        ledger: &mut SkipLedger,
    ) -> Result<Vec<GenerationRequest>> {
        let builder = RequestBuilder::new(self.service, self.config.asset_poll)
            .with_copy_language(&self.config.copy_language);
        let mut requests = Vec::new();

        for record in table.records() {
            let built = self
                .fetcher
                .fetch(record)
                .and_then(|asset| builder.build(record, &asset));
            match built {
                Ok(request) => {
                    tracing::debug!(key = %record.key, file = %request.file_uri, "request built");
                    let mut payload = EventPayload::new();
                    payload.insert("key".to_string(), Value::String(record.key.clone()));
                    payload.insert(
                        "file_uri".to_string(),
                        Value::String(request.file_uri.clone()),
                    );
                    events.emit("request_built", payload)?;
                    requests.push(request);
                }
                Err(failure) => {
                    record_skip(ledger, events, record, failure.reason, &failure.detail)?;
                }
            }
        }

        tracing::info!(
            built = requests.len(),
            skipped = ledger.len(),
            "requests prepared"
        );
        Ok(requests)
    }

    fn settle_batch(
        &self,
        table: &ProductTable,
        requests: &[GenerationRequest],
        events: &EventLog,
        ledger: &mut SkipLedger,
    ) -> Result<Settled> {
        if requests.is_empty() {
            tracing::info!("no requests built; nothing submitted");
            return Ok(Settled {
                status: BatchStatus::NotSubmitted,
                job: None,
                saved: Vec::new(),
            });
        }

        let submitter = BatchSubmitter::new(
            self.service,
            events,
            &self.config.model,
            &self.config.display_name,
            self.config.batch_poll,
        );
        let submitted = submitter.submit(&self.config.artifact_path(), requests)?;

        let (status, job_name, detail) = match submitter.wait(&submitted)? {
            BatchOutcome::Succeeded { job, result_file } => {
                let bytes = self
                    .service
                    .download_file(&result_file)
                    .with_context(|| format!("failed to download results {result_file}"))?;
                let results = String::from_utf8_lossy(&bytes);
                let report = Reconciler::new(table, &self.config.output_dir, events).reconcile(
                    &results,
                    &submitted.keys,
                    ledger,
                )?;
                return Ok(Settled {
                    status: BatchStatus::Succeeded,
                    job: Some(job.name),
                    saved: report.saved,
                });
            }
            BatchOutcome::Failed { job, detail } => (
                BatchStatus::Failed {
                    state: job.state.to_string(),
                    detail: detail.clone(),
                },
                job.name,
                detail,
            ),
            BatchOutcome::TimedOut {
                job_name,
                last_state,
                elapsed,
            } => {
                let detail = format!(
                    "batch wait gave up after {}s in state {last_state}",
                    elapsed.as_secs()
                );
                (BatchStatus::TimedOut { last_state }, job_name, detail)
            }
        };

        tracing::warn!(job = %job_name, status = status.label(), detail = %detail, "batch failed");
        for key in &submitted.keys {
            let record = table.record_or_placeholder(key);
            record_skip(ledger, events, &record, FailureReason::BatchFailed, &detail)?;
        }
        Ok(Settled {
            status,
            job: Some(job_name),
            saved: Vec::new(),
        })
    }

    fn write_ledger(&self, ledger: &SkipLedger, events: &EventLog) -> Result<Option<PathBuf>> {
        match ledger.write(&self.config.skip_report_path)? {
            LedgerWrite::Written { path, rows } => {
                tracing::info!(path = %path.display(), rows, "skip report written");
                let mut payload = EventPayload::new();
                payload.insert(
                    "path".to_string(),
                    Value::String(path.to_string_lossy().to_string()),
                );
                payload.insert("rows".to_string(), Value::from(rows as u64));
                payload.insert(
                    "by_reason".to_string(),
                    serde_json::to_value(ledger.counts_by_reason())?,
                );
                events.emit("ledger_written", payload)?;
                Ok(Some(path))
            }
            LedgerWrite::Empty => {
                tracing::info!("every record produced an image; no skip report written");
                Ok(None)
            }
        }
    }
}
