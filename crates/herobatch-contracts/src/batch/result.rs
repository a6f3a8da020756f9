use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::Value;

use crate::records::FailureReason;

/// Key used when a result line carries no usable key.
pub const UNKNOWN_RESULT_KEY: &str = "no_key";

const DETAIL_MAX_CHARS: usize = 300;

/// Typed outcome of one result line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedResult {
    Image {
        key: String,
        bytes: Vec<u8>,
        mime_type: Option<String>,
    },
    Failed {
        key: String,
        reason: FailureReason,
        detail: String,
    },
}

impl DecodedResult {
    pub fn key(&self) -> &str {
        match self {
            DecodedResult::Image { key, .. } | DecodedResult::Failed { key, .. } => key,
        }
    }

    fn failed(key: String, reason: FailureReason, detail: impl Into<String>) -> Self {
        DecodedResult::Failed {
            key,
            reason,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResultLine {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    response: Option<Value>,
    #[serde(default)]
    status: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default, rename = "inlineData", alias = "inline_data")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    #[serde(default)]
    data: String,
    #[serde(default, rename = "mimeType", alias = "mime_type")]
    mime_type: Option<String>,
}

/// Decodes one line of the batch result file.
///
/// The whole expected shape (`candidates[0].content.parts[*].inlineData`) is
/// validated up front; only the first image-bearing part is returned.
pub fn decode_result_line(line: &str) -> DecodedResult {
    let envelope: ResultLine = match serde_json::from_str(line) {
        Ok(envelope) => envelope,
        Err(err) => {
            return DecodedResult::failed(
                UNKNOWN_RESULT_KEY.to_string(),
                FailureReason::MalformedResponse,
                format!("unparseable result line: {err}"),
            )
        }
    };
    let key = envelope
        .key
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .unwrap_or_else(|| UNKNOWN_RESULT_KEY.to_string());

    let response = match envelope.response {
        Some(response) if !is_empty_value(&response) => response,
        _ => {
            let detail = envelope
                .status
                .or(envelope.error)
                .map(|value| clip(&value.to_string()))
                .unwrap_or_else(|| "result carried no response".to_string());
            return DecodedResult::failed(key, FailureReason::NoResponse, detail);
        }
    };

    let parsed: GenerateContentResponse = match serde_json::from_value(response.clone()) {
        Ok(parsed) => parsed,
        Err(err) => {
            return DecodedResult::failed(
                key,
                FailureReason::MalformedResponse,
                format!("{err}: {}", clip(&response.to_string())),
            )
        }
    };
    let Some(first) = parsed.candidates.into_iter().next() else {
        return DecodedResult::failed(
            key,
            FailureReason::MalformedResponse,
            "response has no candidates",
        );
    };

    let Some(inline) = first
        .content
        .parts
        .into_iter()
        .filter_map(|part| part.inline_data)
        .find(|inline| !inline.data.is_empty())
    else {
        return DecodedResult::failed(
            key,
            FailureReason::NoImageInResponse,
            "no inline image data in any part",
        );
    };

    match BASE64.decode(inline.data.as_bytes()) {
        Ok(bytes) => DecodedResult::Image {
            key,
            bytes,
            mime_type: inline.mime_type,
        },
        Err(err) => DecodedResult::failed(
            key,
            FailureReason::MalformedResponse,
            format!("inline image is not valid base64: {err}"),
        ),
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(rows) => rows.is_empty(),
        Value::String(text) => text.is_empty(),
        _ => false,
    }
}

fn clip(text: &str) -> String {
    if text.chars().count() <= DETAIL_MAX_CHARS {
        return text.to_string();
    }
    text.chars().take(DETAIL_MAX_CHARS).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;
    use serde_json::json;

    use super::*;

    fn image_line(key: &str, parts: serde_json::Value) -> String {
        json!({
            "key": key,
            "response": {"candidates": [{"content": {"role": "model", "parts": parts}}]}
        })
        .to_string()
    }

    #[test]
    fn decodes_first_inline_image() {
        let first = BASE64.encode(b"first-png");
        let second = BASE64.encode(b"second-png");
        let line = image_line(
            "SKU-1",
            json!([
                {"text": "here you go"},
                {"inlineData": {"mimeType": "image/png", "data": first}},
                {"inlineData": {"mimeType": "image/png", "data": second}}
            ]),
        );
        assert_eq!(
            decode_result_line(&line),
            DecodedResult::Image {
                key: "SKU-1".to_string(),
                bytes: b"first-png".to_vec(),
                mime_type: Some("image/png".to_string()),
            }
        );
    }

    #[test]
    fn accepts_snake_case_inline_data() {
        let data = BASE64.encode(b"png");
        let line = image_line("k", json!([{"inline_data": {"mime_type": "image/png", "data": data}}]));
        assert!(matches!(decode_result_line(&line), DecodedResult::Image { .. }));
    }

    #[test]
    fn missing_response_is_no_response() {
        let line = json!({"key": "k", "status": {"code": 13, "message": "internal"}}).to_string();
        match decode_result_line(&line) {
            DecodedResult::Failed { key, reason, detail } => {
                assert_eq!(key, "k");
                assert_eq!(reason, FailureReason::NoResponse);
                assert!(detail.contains("internal"));
            }
            other => panic!("unexpected {other:?}"),
        }
        let empty = json!({"key": "k", "response": {}}).to_string();
        assert!(matches!(
            decode_result_line(&empty),
            DecodedResult::Failed { reason: FailureReason::NoResponse, .. }
        ));
    }

    #[test]
    fn missing_nested_structure_is_malformed() {
        let line = json!({"key": "k", "response": {"promptFeedback": {"blockReason": "SAFETY"}}})
            .to_string();
        assert!(matches!(
            decode_result_line(&line),
            DecodedResult::Failed { reason: FailureReason::MalformedResponse, .. }
        ));
        let no_candidates = json!({"key": "k", "response": {"candidates": []}}).to_string();
        assert!(matches!(
            decode_result_line(&no_candidates),
            DecodedResult::Failed { reason: FailureReason::MalformedResponse, .. }
        ));
    }

    #[test]
    fn text_only_parts_are_no_image() {
        let line = image_line("k", json!([{"text": "I cannot draw that"}]));
        assert!(matches!(
            decode_result_line(&line),
            DecodedResult::Failed { reason: FailureReason::NoImageInResponse, .. }
        ));
        let empty_data = image_line("k", json!([{"inlineData": {"data": ""}}]));
        assert!(matches!(
            decode_result_line(&empty_data),
            DecodedResult::Failed { reason: FailureReason::NoImageInResponse, .. }
        ));
    }

    #[test]
    fn bad_base64_and_bad_json_are_malformed() {
        let line = image_line("k", json!([{"inlineData": {"data": "***not base64***"}}]));
        assert!(matches!(
            decode_result_line(&line),
            DecodedResult::Failed { reason: FailureReason::MalformedResponse, .. }
        ));
        let garbage = decode_result_line("{not json");
        assert_eq!(garbage.key(), UNKNOWN_RESULT_KEY);
    }

    #[test]
    fn missing_key_falls_back_to_placeholder_key() {
        let line = json!({"response": null}).to_string();
        assert_eq!(decode_result_line(&line).key(), UNKNOWN_RESULT_KEY);
    }
}
