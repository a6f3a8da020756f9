use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use herobatch_contracts::batch::{decode_result_line, DecodedResult};
use herobatch_contracts::keys::sanitize_key;
use herobatch_contracts::records::{FailureReason, ProductRecord};
use herobatch_contracts::runs::events::{EventLog, EventPayload};
use herobatch_contracts::runs::ledger::SkipLedger;
use serde_json::Value;

use crate::loader::ProductTable;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedImage {
    pub key: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub saved: Vec<SavedImage>,
    pub failed: usize,
    pub missing: usize,
    pub duplicates: usize,
    pub ignored: usize,
}

/// Maps result lines back to records: images go to disk, everything else to the ledger.
pub struct Reconciler<'a> {
    table: &'a ProductTable,
    output_dir: &'a Path,
    events: &'a EventLog,
}

impl<'a> Reconciler<'a> {
    pub fn new(table: &'a ProductTable, output_dir: &'a Path, events: &'a EventLog) -> Self {
        Self {
            table,
            output_dir,
            events,
        }
    }

    /// Each submitted key ends with exactly one outcome. Keys the file never
    /// mentions are recorded as `NO_RESPONSE`.
    pub fn reconcile(
        &self,
        results: &str,
        submitted: &[String],
        ledger: &mut SkipLedger,
    ) -> Result<ReconcileReport> {
        let submitted_keys: HashSet<&str> = submitted.iter().map(String::as_str).collect();
        let mut resolved: HashSet<String> = HashSet::new();
        let mut report = ReconcileReport::default();

        for (line_no, line) in results.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let decoded = decode_result_line(line);
            let key = decoded.key().to_string();
            if resolved.contains(&key) {
                tracing::warn!(key = %key, line = line_no, "duplicate result line ignored");
                report.duplicates += 1;
                continue;
            }
            if self.table.get(&key).is_some() && !submitted_keys.contains(key.as_str()) {
                tracing::warn!(key = %key, line = line_no, "result for a record that was not submitted");
                report.ignored += 1;
                continue;
            }
            resolved.insert(key.clone());

            match decoded {
                DecodedResult::Image { bytes, .. } => {
                    let path = self.save_image(&key, &bytes)?;
                    report.saved.push(SavedImage { key, path });
                }
                DecodedResult::Failed { reason, detail, .. } => {
                    self.skip(ledger, &key, reason, &detail)?;
                    report.failed += 1;
                }
            }
        }

        for key in submitted {
            if resolved.contains(key) {
                continue;
            }
            self.skip(
                ledger,
                key,
                FailureReason::NoResponse,
                "key absent from the result file",
            )?;
            report.missing += 1;
        }

        tracing::info!(
            saved = report.saved.len(),
            failed = report.failed,
            missing = report.missing,
            "results reconciled"
        );
        Ok(report)
    }

    fn save_image(&self, key: &str, bytes: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(self.output_dir)
            .with_context(|| format!("failed to create {}", self.output_dir.display()))?;
        let path = self.output_dir.join(format!("{}.png", sanitize_key(key)));
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;

        tracing::info!(key = %key, path = %path.display(), "image saved");
        let mut payload = EventPayload::new();
        payload.insert("key".to_string(), Value::String(key.to_string()));
        payload.insert(
            "path".to_string(),
            Value::String(path.to_string_lossy().to_string()),
        );
        payload.insert("bytes".to_string(), Value::from(bytes.len() as u64));
        self.events.emit("image_saved", payload)?;
        Ok(path)
    }

    fn skip(
        &self,
        ledger: &mut SkipLedger,
        key: &str,
        reason: FailureReason,
        detail: &str,
    ) -> Result<()> {
        let record = self.table.record_or_placeholder(key);
        record_skip(ledger, self.events, &record, reason, detail)
    }
}

/// Adds a record to the ledger, logging it the first time its key is seen.
pub(crate) fn record_skip(
    ledger: &mut SkipLedger,
    events: &EventLog,
    record: &ProductRecord,
    reason: FailureReason,
    detail: &str,
) -> Result<()> {
    if ledger.record(record, reason) {
        tracing::warn!(key = %record.key, reason = %reason, detail, "record skipped");
        events.record_skipped(&record.key, reason, detail)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use herobatch_contracts::records::{ColumnMap, FailureReason};
    use herobatch_contracts::runs::events::EventLog;
    use herobatch_contracts::runs::ledger::SkipLedger;
    use serde_json::json;

    use crate::loader::parse_products;

    use super::Reconciler;

    fn image_line(key: &str, bytes: &[u8]) -> String {
        json!({
            "key": key,
            "response": {"candidates": [{"content": {"parts": [
                {"text": "here you go"},
                {"inlineData": {"mimeType": "image/png", "data": BASE64.encode(bytes)}}
            ]}}]}
        })
        .to_string()
    }

    fn keys(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn every_submitted_key_gets_one_outcome() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let input = "SKU,productName,description,imageURL\n\
                     A,a,,u\nB/1,b,,u\nC,c,,u\nD,d,,u\nE,e,,u\n";
        let table = parse_products(input.as_bytes(), &ColumnMap::default())?;
        let events = EventLog::new(temp.path().join("events.jsonl"), "run-1");
        let output_dir = temp.path().join("out");
        let mut ledger = SkipLedger::new(table.columns().to_vec());

        let results = [
            image_line("A", b"png-a"),
            image_line("A", b"png-a-again"),
            image_line("B/1", b"png-b"),
            json!({"key": "C", "response": {"candidates": []}}).to_string(),
            json!({"key": "ghost", "response": null}).to_string(),
            "{not json".to_string(),
            image_line("E", b"png-e"),
        ]
        .join("\n");

        let report = Reconciler::new(&table, &output_dir, &events).reconcile(
            &results,
            &keys(&["A", "B/1", "C", "D"]),
            &mut ledger,
        )?;

        let saved: Vec<&str> = report.saved.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(saved, ["A", "B/1"]);
        assert_eq!(std::fs::read(output_dir.join("A.png"))?, b"png-a");
        assert!(output_dir.join("B%2F1.png").exists());
        assert!(!output_dir.join("E.png").exists());
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.ignored, 1);
        assert_eq!(report.missing, 1);

        assert_eq!(ledger.reason_for("C"), Some(FailureReason::MalformedResponse));
        assert_eq!(ledger.reason_for("D"), Some(FailureReason::NoResponse));
        assert_eq!(ledger.reason_for("ghost"), Some(FailureReason::NoResponse));
        assert_eq!(ledger.reason_for("no_key"), Some(FailureReason::MalformedResponse));
        assert!(!ledger.contains("A"));
        assert!(!ledger.contains("E"));

        let ghost = ledger
            .entries()
            .iter()
            .find(|entry| entry.record.key == "ghost")
            .map(|entry| entry.record.cell("SKU").to_string());
        assert_eq!(ghost.as_deref(), Some("ghost"));
        Ok(())
    }

    #[test]
    fn empty_result_file_marks_everything_no_response() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let input = "SKU,productName,description,imageURL\nA,a,,u\nB,b,,u\n";
        let table = parse_products(input.as_bytes(), &ColumnMap::default())?;
        let events = EventLog::new(temp.path().join("events.jsonl"), "run-1");
        let output_dir = temp.path().join("out");
        let mut ledger = SkipLedger::new(table.columns().to_vec());

        let report = Reconciler::new(&table, &output_dir, &events).reconcile(
            "\n\n",
            &keys(&["A", "B"]),
            &mut ledger,
        )?;
        assert!(report.saved.is_empty());
        assert_eq!(report.missing, 2);
        assert_eq!(ledger.len(), 2);
        Ok(())
    }
}
