use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use herobatch_contracts::batch::{BatchJob, BatchState, FileState, RemoteFile};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use serde_json::{json, Value};

use super::{non_empty_env, response_json_or_error, truncate_text, GenerationService};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_UPLOAD_BASE: &str = "https://generativelanguage.googleapis.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Gemini Developer API client covering the Files and Batch endpoints.
pub struct GeminiService {
    api_base: String,
    upload_base: String,
    api_key: String,
    http: HttpClient,
}

impl GeminiService {
    pub fn new(
        api_key: impl Into<String>,
        api_base: impl Into<String>,
        upload_base: impl Into<String>,
    ) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build Gemini HTTP client")?;
        Ok(Self {
            api_base: api_base.into().trim().trim_end_matches('/').to_string(),
            upload_base: upload_base.into().trim().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http,
        })
    }

    /// Reads `GEMINI_API_KEY` (or `GOOGLE_API_KEY`), `GEMINI_API_BASE` and `GEMINI_UPLOAD_BASE`.
    pub fn from_env() -> Result<Self> {
        let Some(api_key) = non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
        else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        Self::new(
            api_key,
            non_empty_env("GEMINI_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            non_empty_env("GEMINI_UPLOAD_BASE").unwrap_or_else(|| DEFAULT_UPLOAD_BASE.to_string()),
        )
    }

    fn batch_endpoint(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:batchGenerateContent", self.api_base, model_path)
    }

    fn resource_endpoint(&self, name: &str) -> String {
        format!("{}/{}", self.api_base, name.trim().trim_start_matches('/'))
    }

    fn download_endpoint(&self, name: &str) -> String {
        format!(
            "{}/download/v1beta/{}:download",
            self.upload_base,
            name.trim().trim_start_matches('/')
        )
    }

    fn get_json(&self, label: &str, endpoint: &str) -> Result<Value> {
        let response = self
            .http
            .get(endpoint)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .with_context(|| format!("{label} request failed ({endpoint})"))?;
        response_json_or_error(label, response)
    }
}

impl GenerationService for GeminiService {
    fn name(&self) -> &str {
        "gemini"
    }

    fn upload_file(&self, path: &Path, mime_type: &str, display_name: &str) -> Result<RemoteFile> {
        let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let start_endpoint = format!("{}/upload/v1beta/files", self.upload_base);
        let start = self
            .http
            .post(&start_endpoint)
            .query(&[("key", self.api_key.as_str())])
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&json!({ "file": { "display_name": display_name } }))
            .send()
            .with_context(|| format!("Gemini upload start failed ({start_endpoint})"))?;
        let status = start.status();
        if !status.is_success() {
            let body = start.text().unwrap_or_default();
            bail!(
                "Gemini upload start failed ({}): {}",
                status.as_u16(),
                truncate_text(&body, 512)
            );
        }
        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .context("Gemini upload start returned no upload URL")?;

        let response = self
            .http
            .post(&upload_url)
            .header(CONTENT_LENGTH, bytes.len().to_string())
            .header(CONTENT_TYPE, mime_type)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes)
            .send()
            .context("Gemini upload finalize failed")?;
        let payload = response_json_or_error("Gemini upload", response)?;
        parse_remote_file(payload.get("file").unwrap_or(&payload))
    }

    fn get_file(&self, name: &str) -> Result<RemoteFile> {
        let payload = self.get_json("Gemini file get", &self.resource_endpoint(name))?;
        parse_remote_file(&payload)
    }

    fn create_batch(&self, model: &str, source_file: &str, display_name: &str) -> Result<BatchJob> {
        let endpoint = self.batch_endpoint(model);
        let payload = json!({
            "batch": {
                "display_name": display_name,
                "input_config": { "file_name": source_file },
            }
        });
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&payload)
            .send()
            .with_context(|| format!("Gemini batch create failed ({endpoint})"))?;
        let body = response_json_or_error("Gemini batch create", response)?;
        parse_batch_job(&body)
    }

    fn get_batch(&self, name: &str) -> Result<BatchJob> {
        let payload = self.get_json("Gemini batch get", &self.resource_endpoint(name))?;
        parse_batch_job(&payload)
    }

    fn download_file(&self, name: &str) -> Result<Vec<u8>> {
        let endpoint = self.download_endpoint(name);
        let response = self
            .http
            .get(&endpoint)
            .query(&[("alt", "media"), ("key", self.api_key.as_str())])
            .send()
            .with_context(|| format!("Gemini file download failed ({endpoint})"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!(
                "Gemini file download failed ({}): {}",
                status.as_u16(),
                truncate_text(&body, 512)
            );
        }
        let bytes = response
            .bytes()
            .context("Gemini file download body read failed")?;
        Ok(bytes.to_vec())
    }
}

fn str_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|text| !text.is_empty())
}

pub(crate) fn parse_remote_file(payload: &Value) -> Result<RemoteFile> {
    let Some(name) = str_field(payload, &["name"]) else {
        bail!(
            "Gemini file payload has no name: {}",
            truncate_text(&payload.to_string(), 256)
        );
    };
    Ok(RemoteFile {
        name: name.to_string(),
        uri: str_field(payload, &["uri"]).map(str::to_string),
        mime_type: str_field(payload, &["mimeType", "mime_type"]).map(str::to_string),
        state: FileState::parse(str_field(payload, &["state"]).unwrap_or("ACTIVE")),
    })
}

/// Reads a batch operation payload. The state lives under `metadata` for the
/// long-running operation form and at the top level for the bare batch form.
pub(crate) fn parse_batch_job(payload: &Value) -> Result<BatchJob> {
    let Some(name) = str_field(payload, &["name"]) else {
        bail!(
            "Gemini batch payload has no name: {}",
            truncate_text(&payload.to_string(), 256)
        );
    };
    let metadata = payload.get("metadata").unwrap_or(payload);
    let response = payload.get("response");

    let error = payload
        .get("error")
        .map(|error| {
            str_field(error, &["message"])
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string())
        });
    let raw_state = str_field(metadata, &["state"])
        .or_else(|| response.and_then(|response| str_field(response, &["state"])));
    let done = payload.get("done").and_then(Value::as_bool).unwrap_or(false);
    let state = match raw_state {
        Some(raw) => BatchState::parse(raw),
        None if done && error.is_some() => BatchState::Failed,
        None if done => BatchState::Succeeded,
        None => BatchState::Pending,
    };

    let result_file = [Some(metadata), response]
        .into_iter()
        .flatten()
        .find_map(|source| {
            let output = source.get("output").or_else(|| source.get("dest"))?;
            str_field(output, &["responsesFile", "responses_file", "fileName", "file_name"])
        })
        .or_else(|| response.and_then(|response| str_field(response, &["responsesFile"])))
        .map(str::to_string);

    Ok(BatchJob {
        name: name.to_string(),
        state,
        result_file,
        error,
    })
}
