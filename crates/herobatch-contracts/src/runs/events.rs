use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use serde_json::{Map, Value};

use crate::records::FailureReason;
use crate::runs::summary::now_utc_iso;

pub type EventPayload = Map<String, Value>;

/// Append-only writer for a run's `events.jsonl`.
///
/// Every line carries `type`, `run_id` and `ts`; the caller payload is merged
/// last. The pipeline is single-threaded, so lines are appended in call order.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
    run_id: String,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            run_id: run_id.into(),
        }
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert("run_id".to_string(), Value::String(self.run_id.clone()));
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        event.extend(payload);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(&event)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }

    pub fn record_skipped(
        &self,
        key: &str,
        reason: FailureReason,
        detail: &str,
    ) -> anyhow::Result<Value> {
        let mut payload = EventPayload::new();
        payload.insert("key".to_string(), Value::String(key.to_string()));
        payload.insert(
            "reason".to_string(),
            Value::String(reason.as_str().to_string()),
        );
        payload.insert("detail".to_string(), Value::String(detail.to_string()));
        self.emit("record_skipped", payload)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let log = EventLog::new(&path, "run-123");

        let mut payload = EventPayload::new();
        payload.insert("rows".to_string(), Value::from(4));
        let emitted = log.emit("run_started", payload)?;

        let content = fs::read_to_string(&path)?;
        let parsed: Value = serde_json::from_str(content.lines().next().unwrap_or(""))?;
        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::String("run_started".to_string()));
        assert_eq!(parsed["run_id"], Value::String("run-123".to_string()));
        assert_eq!(parsed["rows"], Value::from(4));
        DateTime::parse_from_rfc3339(parsed["ts"].as_str().unwrap_or(""))?;
        Ok(())
    }

    #[test]
    fn record_skipped_carries_key_and_reason() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let log = EventLog::new(&path, "run-123");

        log.emit("run_started", EventPayload::new())?;
        log.record_skipped("SKU/9", FailureReason::NoUrl, "empty imageURL")?;

        let content = fs::read_to_string(&path)?;
        let lines: Vec<Value> = content
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["type"], Value::String("record_skipped".to_string()));
        assert_eq!(lines[1]["key"], Value::String("SKU/9".to_string()));
        assert_eq!(lines[1]["reason"], Value::String("NO_URL".to_string()));
        Ok(())
    }
}
