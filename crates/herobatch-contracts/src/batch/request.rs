use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const IMAGE_RESPONSE_MODALITY: &str = "IMAGE";

/// One unit of work for the batch job, correlated by `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub key: String,
    pub file_uri: String,
    pub mime_type: String,
    pub prompt: String,
}

impl GenerationRequest {
    pub fn to_line(&self) -> BatchRequestLine {
        BatchRequestLine {
            key: self.key.clone(),
            request: GenerateContentRequest {
                contents: vec![Content {
                    role: "user".to_string(),
                    parts: vec![
                        RequestPart::File {
                            file_data: FileData {
                                file_uri: self.file_uri.clone(),
                                mime_type: self.mime_type.clone(),
                            },
                        },
                        RequestPart::Text {
                            text: self.prompt.clone(),
                        },
                    ],
                }],
                generation_config: GenerationConfig {
                    response_modalities: vec![IMAGE_RESPONSE_MODALITY.to_string()],
                },
            },
        }
    }
}

/// Wire shape of a single line in the batch input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequestLine {
    pub key: String,
    pub request: GenerateContentRequest,
}

impl BatchRequestLine {
    pub fn prompt_text(&self) -> Option<&str> {
        self.request
            .contents
            .iter()
            .flat_map(|content| content.parts.iter())
            .find_map(|part| match part {
                RequestPart::Text { text } => Some(text.as_str()),
                RequestPart::File { .. } => None,
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<RequestPart>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestPart {
    File {
        #[serde(rename = "fileData")]
        file_data: FileData,
    },
    Text {
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub file_uri: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
}

/// Writes one compact JSON object per request, in request order.
pub fn write_batch_artifact(path: &Path, requests: &[GenerationRequest]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for request in requests {
        serde_json::to_writer(&mut writer, &request.to_line())?;
        writer.write_all(b"\n")?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn read_batch_artifact(path: &Path) -> anyhow::Result<Vec<BatchRequestLine>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut lines = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: BatchRequestLine = serde_json::from_str(&line)
            .with_context(|| format!("invalid batch request on line {}", idx + 1))?;
        lines.push(parsed);
    }
    Ok(lines)
}
