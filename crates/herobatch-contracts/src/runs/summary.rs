use std::collections::BTreeMap;
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub input_rows: u64,
    pub submitted: u64,
    pub produced: u64,
    /// Skipped rows of the loaded input.
    pub skipped: u64,
    /// Result keys that matched no loaded row. Reported, never counted as rows.
    #[serde(default)]
    pub unmatched_results: u64,
    pub batch_status: String,
    pub batch_job: Option<String>,
    pub skip_report: Option<String>,
    #[serde(default)]
    pub skipped_by_reason: BTreeMap<String, u64>,
}

impl RunSummary {
    /// Every input row is either produced or skipped.
    pub fn is_complete(&self) -> bool {
        self.produced + self.skipped == self.input_rows
    }
}

pub fn write_summary(path: &Path, summary: &RunSummary) -> anyhow::Result<()> {
    let mut payload = serde_json::to_value(summary)?;
    if let Some(map) = payload.as_object_mut() {
        map.insert(
            "ts".to_string(),
            serde_json::Value::String(now_utc_iso()),
        );
        map.insert(
            "complete".to_string(),
            serde_json::Value::Bool(summary.is_complete()),
        );
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&payload)?)?;
    Ok(())
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
