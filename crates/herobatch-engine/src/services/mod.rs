use std::env;
use std::path::Path;

use anyhow::{bail, Context, Result};
use herobatch_contracts::batch::{BatchJob, RemoteFile};
use reqwest::blocking::Response as HttpResponse;
use serde_json::Value;

mod dryrun;
mod gemini;

pub use dryrun::DryrunService;
pub use gemini::GeminiService;

/// The remote batch-inference surface the pipeline drives.
pub trait GenerationService: Send + Sync {
    fn name(&self) -> &str;
    fn upload_file(&self, path: &Path, mime_type: &str, display_name: &str) -> Result<RemoteFile>;
    fn get_file(&self, name: &str) -> Result<RemoteFile>;
    fn create_batch(&self, model: &str, source_file: &str, display_name: &str) -> Result<BatchJob>;
    fn get_batch(&self, name: &str) -> Result<BatchJob>;
    fn download_file(&self, name: &str) -> Result<Vec<u8>>;
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn response_json_or_error(label: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{label} response body read failed"))?;
    if !status.is_success() {
        bail!("{label} request failed ({code}): {}", truncate_text(&body, 512));
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{label} returned invalid JSON payload"))?;
    Ok(parsed)
}

/// Flattens an error chain into one line for logs and skip details.
pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() || parts.last().map(String::as_str) == Some(trimmed) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::{error_chain_text, truncate_text};

    #[test]
    fn error_chain_text_joins_distinct_causes() {
        let err = Err::<(), _>(anyhow::anyhow!("connection refused"))
            .context("upload failed")
            .unwrap_err();
        assert_eq!(
            error_chain_text(&err, 200),
            "upload failed | caused by: connection refused"
        );
    }

    #[test]
    fn truncate_text_marks_cut() {
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("abc", 3), "abc");
    }
}
