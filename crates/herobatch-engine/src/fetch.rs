use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use herobatch_contracts::keys::sanitize_key;
use herobatch_contracts::records::{FailureReason, ProductRecord, RecordFailure};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;

use crate::services::{error_chain_text, truncate_text};

/// Raw body of a successful download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedBody {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Where source photos come from. Any error means the download failed.
pub trait AssetSource {
    fn get(&self, url: &str) -> Result<DownloadedBody>;
}

pub struct HttpAssetSource {
    http: HttpClient,
}

impl HttpAssetSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("failed to build download HTTP client")?;
        Ok(Self { http })
    }
}

impl AssetSource for HttpAssetSource {
    fn get(&self, url: &str) -> Result<DownloadedBody> {
        let response = self
            .http
            .get(url)
            .send()
            .with_context(|| format!("GET {url} failed"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("GET {url} returned HTTP {}", status.as_u16());
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .with_context(|| format!("GET {url} body read failed"))?;
        Ok(DownloadedBody {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Png,
    Jpeg,
    Webp,
    Gif,
    Bmp,
}

impl MediaType {
    pub fn mime(&self) -> &'static str {
        match self {
            MediaType::Png => "image/png",
            MediaType::Jpeg => "image/jpeg",
            MediaType::Webp => "image/webp",
            MediaType::Gif => "image/gif",
            MediaType::Bmp => "image/bmp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            MediaType::Png => "png",
            MediaType::Jpeg => "jpg",
            MediaType::Webp => "webp",
            MediaType::Gif => "gif",
            MediaType::Bmp => "bmp",
        }
    }

    /// Only png, webp and jpeg are trusted from the header.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let lowered = content_type.to_ascii_lowercase();
        if lowered.contains("png") {
            return Some(MediaType::Png);
        }
        if lowered.contains("webp") {
            return Some(MediaType::Webp);
        }
        if lowered.contains("jpeg") || lowered.contains("jpg") {
            return Some(MediaType::Jpeg);
        }
        None
    }

    pub fn from_url(url: &str) -> Option<Self> {
        let path = Url::parse(url)
            .map(|parsed| parsed.path().to_string())
            .unwrap_or_else(|_| {
                url.split(['?', '#'])
                    .next()
                    .unwrap_or_default()
                    .to_string()
            });
        let file_name = path.rsplit('/').next().unwrap_or_default();
        let (_, ext) = file_name.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(MediaType::Png),
            "jpg" | "jpeg" | "jpe" => Some(MediaType::Jpeg),
            "webp" => Some(MediaType::Webp),
            "gif" => Some(MediaType::Gif),
            "bmp" => Some(MediaType::Bmp),
            _ => None,
        }
    }

    /// Header first, then URL extension, then jpeg.
    pub fn resolve(content_type: Option<&str>, url: &str) -> Self {
        content_type
            .and_then(Self::from_content_type)
            .or_else(|| Self::from_url(url))
            .unwrap_or(MediaType::Jpeg)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedAsset {
    pub key: String,
    pub path: PathBuf,
    pub media_type: MediaType,
}

/// Downloads source photos into a scratch directory, one file per key.
pub struct AssetFetcher {
    source: Box<dyn AssetSource>,
    tmp_dir: PathBuf,
}

impl AssetFetcher {
    pub fn new(source: Box<dyn AssetSource>, tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            tmp_dir: tmp_dir.into(),
        }
    }

    pub fn fetch(&self, record: &ProductRecord) -> Result<FetchedAsset, RecordFailure> {
        let url = record.image_url.trim();
        if url.is_empty() {
            return Err(RecordFailure::new(
                FailureReason::NoUrl,
                "record has no image URL",
            ));
        }

        let body = self.source.get(url).map_err(|err| {
            RecordFailure::new(FailureReason::DownloadFailed, error_chain_text(&err, 400))
        })?;
        let media_type = MediaType::resolve(body.content_type.as_deref(), url);
        let path = self.tmp_dir.join(format!(
            "{}.{}",
            sanitize_key(&record.key),
            media_type.extension()
        ));

        fs::create_dir_all(&self.tmp_dir)
            .and_then(|_| fs::write(&path, &body.bytes))
            .map_err(|err| {
                RecordFailure::new(
                    FailureReason::DownloadFailed,
                    format!(
                        "failed to store {}: {}",
                        path.display(),
                        truncate_text(&err.to_string(), 200)
                    ),
                )
            })?;

        Ok(FetchedAsset {
            key: record.key.clone(),
            path,
            media_type,
        })
    }
}
