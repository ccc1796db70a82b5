use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::save_artifact;
use crate::events::now_utc_iso;

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

const OMITTED: &str = "<omitted>";

/// One file written by a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub path: PathBuf,
    pub source_url: String,
    pub bytes: u64,
    pub sha256: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub schema_version: u64,
    pub kind: String,
    pub model: String,
    pub task_id: Option<String>,
    pub created_at: String,
    pub request: Value,
    pub provider_request: Value,
    pub provider_response: Value,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRecord>,
    #[serde(default)]
    pub result_metadata: Map<String, Value>,
}

impl Receipt {
    /// Inline image payloads (`data:` URIs, `b64_json`) are replaced before storing.
    pub fn new(
        kind: impl Into<String>,
        model: impl Into<String>,
        task_id: Option<String>,
        request: &Value,
        provider_request: &Value,
        provider_response: &Value,
    ) -> Self {
        Self {
            schema_version: RECEIPT_SCHEMA_VERSION,
            kind: kind.into(),
            model: model.into(),
            task_id,
            created_at: now_utc_iso(),
            request: sanitize_payload(request),
            provider_request: sanitize_payload(provider_request),
            provider_response: sanitize_payload(provider_response),
            warnings: Vec::new(),
            artifacts: Vec::new(),
            result_metadata: Map::new(),
        }
    }

    pub fn file_name(&self) -> String {
        let stem = self
            .task_id
            .as_deref()
            .map(str::to_string)
            .or_else(|| {
                self.artifacts
                    .first()
                    .and_then(|artifact| artifact.path.file_stem())
                    .map(|stem| stem.to_string_lossy().to_string())
            })
            .unwrap_or_else(|| self.kind.clone());
        let safe: String = stem
            .chars()
            .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
            .collect();
        format!("receipt-{safe}.json")
    }
}

/// Saves next to earlier receipts without replacing any of them.
pub fn write_receipt(dir: &Path, receipt: &Receipt) -> anyhow::Result<PathBuf> {
    save_artifact(dir, &receipt.file_name(), &serde_json::to_vec_pretty(receipt)?)
}

fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::String(text) if text.starts_with("data:") => Value::String(OMITTED.to_string()),
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                if key.eq_ignore_ascii_case("b64_json") {
                    out.insert(key.clone(), Value::String(OMITTED.to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::{json, Value};

    use super::{write_receipt, ArtifactRecord, Receipt, RECEIPT_SCHEMA_VERSION};

    #[test]
    fn receipt_strips_inline_images_and_keeps_urls() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let request = json!({
            "model": "Wan-AI/Wan2.2-I2V",
            "input": {
                "prompt": "wave",
                "first_frame_url": "data:image/png;base64,AAAA",
                "last_frame_url": "https://x/last.png",
            },
        });
        let response = json!({"output": {"task_status": "Success", "urls": ["http://x/video.mp4"]}});
        let mut receipt = Receipt::new(
            "video",
            "Wan-AI/Wan2.2-I2V",
            Some("task/42".to_string()),
            &request,
            &request,
            &response,
        );
        receipt.artifacts.push(ArtifactRecord {
            path: temp.path().join("clip.mp4"),
            source_url: "http://x/video.mp4".to_string(),
            bytes: 3,
            sha256: "abc".to_string(),
            width: None,
            height: None,
        });

        let path = write_receipt(temp.path(), &receipt)?;
        assert_eq!(path.file_name().and_then(|name| name.to_str()), Some("receipt-task_42.json"));

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(parsed["schema_version"], json!(RECEIPT_SCHEMA_VERSION));
        assert_eq!(parsed["request"]["input"]["first_frame_url"], json!("<omitted>"));
        assert_eq!(parsed["request"]["input"]["last_frame_url"], json!("https://x/last.png"));
        assert_eq!(
            parsed["provider_response"]["output"]["urls"][0],
            json!("http://x/video.mp4")
        );
        assert_eq!(parsed["artifacts"][0]["bytes"], json!(3));
        Ok(())
    }

    #[test]
    fn repeated_receipts_keep_earlier_runs() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut first = Receipt::new("image", "flux", None, &json!({}), &json!({}), &json!({}));
        first.warnings.push("first run".to_string());
        let mut second = first.clone();
        second.warnings = vec!["second run".to_string()];

        let first_path = write_receipt(temp.path(), &first)?;
        let second_path = write_receipt(temp.path(), &second)?;

        assert_eq!(first_path, temp.path().join("receipt-image.json"));
        assert_eq!(second_path, temp.path().join("receipt-image-1.json"));
        let kept: Value = serde_json::from_str(&std::fs::read_to_string(&first_path)?)?;
        assert_eq!(kept["warnings"], json!(["first run"]));
        Ok(())
    }

    #[test]
    fn receipt_without_task_is_named_after_first_artifact() {
        let mut receipt = Receipt::new("image", "flux", None, &json!({}), &json!({}), &json!({"b64_json": "zzz"}));
        assert_eq!(receipt.file_name(), "receipt-image.json");
        assert_eq!(receipt.provider_response["b64_json"], json!("<omitted>"));
        receipt.artifacts.push(ArtifactRecord {
            path: PathBuf::from("/out/ComfyUI_20260101_000000_0.png"),
            source_url: "http://x/a.png".to_string(),
            bytes: 1,
            sha256: String::new(),
            width: Some(1),
            height: Some(1),
        });
        assert_eq!(receipt.file_name(), "receipt-ComfyUI_20260101_000000_0.json");
    }
}
