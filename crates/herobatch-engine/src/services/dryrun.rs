use std::collections::BTreeMap;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use herobatch_contracts::batch::{BatchJob, BatchRequestLine, BatchState, FileState, RemoteFile};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

const DEFAULT_IMAGE_SIDE: u32 = 64;

struct StoredFile {
    mime_type: String,
    bytes: Vec<u8>,
}

/// Offline stand-in for the remote service.
///
/// Uploads are kept in memory; a batch renders one flat-colour PNG per
/// request (colour derived from the prompt) and reports `SUCCEEDED` on the
/// first poll.
pub struct DryrunService {
    image_side: u32,
    counter: AtomicU64,
    files: Mutex<BTreeMap<String, StoredFile>>,
    batches: Mutex<BTreeMap<String, BatchJob>>,
}

impl Default for DryrunService {
    fn default() -> Self {
        Self::new()
    }
}

impl DryrunService {
    pub fn new() -> Self {
        Self::with_image_side(DEFAULT_IMAGE_SIDE)
    }

    pub fn with_image_side(image_side: u32) -> Self {
        Self {
            image_side: image_side.max(1),
            counter: AtomicU64::new(0),
            files: Mutex::new(BTreeMap::new()),
            batches: Mutex::new(BTreeMap::new()),
        }
    }

    fn next_id(&self, label: &str) -> String {
        let idx = self.counter.fetch_add(1, Ordering::SeqCst);
        short_id(label, idx)
    }

    fn store(&self, mime_type: &str, bytes: Vec<u8>) -> Result<RemoteFile> {
        let name = format!("files/dryrun-{}", self.next_id(mime_type));
        let mut files = self
            .files
            .lock()
            .map_err(|_| anyhow!("dryrun file store lock poisoned"))?;
        files.insert(
            name.clone(),
            StoredFile {
                mime_type: mime_type.to_string(),
                bytes,
            },
        );
        Ok(RemoteFile {
            uri: Some(format!("dryrun://{name}")),
            mime_type: Some(mime_type.to_string()),
            state: FileState::Active,
            name,
        })
    }

    fn file_bytes(&self, name: &str) -> Result<Vec<u8>> {
        let files = self
            .files
            .lock()
            .map_err(|_| anyhow!("dryrun file store lock poisoned"))?;
        files
            .get(name)
            .map(|file| file.bytes.clone())
            .with_context(|| format!("dryrun file not found: {name}"))
    }

    fn render_result_line(&self, raw_line: &str) -> Result<Value> {
        let line: BatchRequestLine = match serde_json::from_str(raw_line) {
            Ok(line) => line,
            Err(err) => {
                return Ok(json!({
                    "status": {"code": 3, "message": format!("invalid request line: {err}")}
                }))
            }
        };
        let prompt = line.prompt_text().unwrap_or_default();
        let png = render_placeholder_png(self.image_side, &line.key, prompt)?;
        Ok(json!({
            "key": line.key,
            "response": {
                "candidates": [{
                    "content": {
                        "role": "model",
                        "parts": [{
                            "inlineData": {
                                "mimeType": "image/png",
                                "data": BASE64.encode(png),
                            }
                        }]
                    },
                    "finishReason": "STOP"
                }]
            }
        }))
    }
}

impl super::GenerationService for DryrunService {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn upload_file(&self, path: &Path, mime_type: &str, _display_name: &str) -> Result<RemoteFile> {
        let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        self.store(mime_type, bytes)
    }

    fn get_file(&self, name: &str) -> Result<RemoteFile> {
        let files = self
            .files
            .lock()
            .map_err(|_| anyhow!("dryrun file store lock poisoned"))?;
        let file = files
            .get(name)
            .with_context(|| format!("dryrun file not found: {name}"))?;
        Ok(RemoteFile {
            name: name.to_string(),
            uri: Some(format!("dryrun://{name}")),
            mime_type: Some(file.mime_type.clone()),
            state: FileState::Active,
        })
    }

    fn create_batch(&self, model: &str, source_file: &str, _display_name: &str) -> Result<BatchJob> {
        let source = String::from_utf8(self.file_bytes(source_file)?)
            .context("dryrun batch source is not UTF-8")?;
        let mut results = String::new();
        for raw_line in source.lines().filter(|line| !line.trim().is_empty()) {
            results.push_str(&serde_json::to_string(&self.render_result_line(raw_line)?)?);
            results.push('\n');
        }
        let result_file = self.store("application/jsonl", results.into_bytes())?;

        let name = format!("batches/dryrun-{}", self.next_id(model));
        let finished = BatchJob {
            name: name.clone(),
            state: BatchState::Succeeded,
            result_file: Some(result_file.name),
            error: None,
        };
        self.batches
            .lock()
            .map_err(|_| anyhow!("dryrun batch store lock poisoned"))?
            .insert(name.clone(), finished);
        Ok(BatchJob {
            name,
            state: BatchState::Pending,
            result_file: None,
            error: None,
        })
    }

    fn get_batch(&self, name: &str) -> Result<BatchJob> {
        self.batches
            .lock()
            .map_err(|_| anyhow!("dryrun batch store lock poisoned"))?
            .get(name)
            .cloned()
            .with_context(|| format!("dryrun batch not found: {name}"))
    }

    fn download_file(&self, name: &str) -> Result<Vec<u8>> {
        self.file_bytes(name)
    }
}

fn render_placeholder_png(side: u32, key: &str, prompt: &str) -> Result<Vec<u8>> {
    let (r, g, b) = color_from_prompt(key, prompt);
    let mut image = RgbImage::new(side, side);
    for pixel in image.pixels_mut() {
        *pixel = Rgb([r, g, b]);
    }
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut out, ImageFormat::Png)
        .context("failed to encode dryrun PNG")?;
    Ok(out.into_inner())
}

fn color_from_prompt(key: &str, prompt: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update(prompt.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn short_id(label: &str, idx: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(label.as_bytes());
    hasher.update(idx.to_be_bytes());
    let digest = hasher.finalize();
    format!("{idx:04}-{}", hex::encode(&digest[..4]))
}
