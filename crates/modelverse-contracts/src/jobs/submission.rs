use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const DEFAULT_VIDEO_DURATION_S: u32 = 5;
pub const DEFAULT_VIDEO_RESOLUTION: &str = "720P";

/// A fully built async job, ready for `POST /v1/tasks/submit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSubmission {
    pub model: String,
    #[serde(default)]
    pub input: Map<String, Value>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl JobSubmission {
    pub fn new(model: impl Into<String>, input: Map<String, Value>, parameters: Map<String, Value>) -> Self {
        Self {
            model: model.into(),
            input,
            parameters,
        }
    }

    pub fn payload(&self) -> Value {
        json!({
            "model": self.model,
            "input": self.input,
            "parameters": self.parameters,
        })
    }
}

/// Caller-side description of a video generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRequest {
    pub model: String,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    /// URL or `data:` URI of the first frame (image-to-video only).
    pub first_frame: Option<String>,
    pub last_frame: Option<String>,
    pub resolution: String,
    /// `W*H`; the text-to-video model takes it, image-to-video follows the frame.
    pub size: Option<String>,
    pub seed: i64,
    pub duration: u32,
}

impl VideoRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            negative_prompt: None,
            first_frame: None,
            last_frame: None,
            resolution: DEFAULT_VIDEO_RESOLUTION.to_string(),
            size: None,
            seed: 0,
            duration: DEFAULT_VIDEO_DURATION_S,
        }
    }

    /// Consumes the descriptor into the submit payload. Blank optional fields are left out.
    pub fn into_submission(self) -> JobSubmission {
        let mut input = Map::new();
        input.insert("prompt".to_string(), Value::String(self.prompt));
        for (key, value) in [
            ("negative_prompt", self.negative_prompt),
            ("first_frame_url", self.first_frame),
            ("last_frame_url", self.last_frame),
        ] {
            if let Some(value) = non_blank(value) {
                input.insert(key.to_string(), Value::String(value));
            }
        }

        let mut parameters = Map::new();
        parameters.insert("resolution".to_string(), Value::String(self.resolution));
        if let Some(size) = non_blank(self.size) {
            parameters.insert("size".to_string(), Value::String(size));
        }
        parameters.insert("seed".to_string(), Value::from(self.seed));
        parameters.insert("duration".to_string(), Value::from(self.duration));

        JobSubmission::new(self.model, input, parameters)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::VideoRequest;

    #[test]
    fn text_to_video_payload_matches_submit_shape() {
        let mut request = VideoRequest::new("Wan-AI/Wan2.2-T2V", "a beautiful flower");
        request.negative_prompt = Some("low quality".to_string());
        request.size = Some("1280*720".to_string());
        request.seed = 42;

        let payload = request.into_submission().payload();
        assert_eq!(
            payload,
            json!({
                "model": "Wan-AI/Wan2.2-T2V",
                "input": {"prompt": "a beautiful flower", "negative_prompt": "low quality"},
                "parameters": {"resolution": "720P", "size": "1280*720", "seed": 42, "duration": 5},
            })
        );
    }

    #[test]
    fn blank_optionals_are_dropped_and_frames_trimmed() {
        let mut request = VideoRequest::new("Wan-AI/Wan2.2-I2V", "Convert to video");
        request.negative_prompt = Some("   ".to_string());
        request.first_frame = Some(" https://x/first.png ".to_string());
        request.last_frame = Some(String::new());

        let submission = request.into_submission();
        assert_eq!(submission.input.get("negative_prompt"), None);
        assert_eq!(submission.input.get("last_frame_url"), None);
        assert_eq!(
            submission.input.get("first_frame_url"),
            Some(&json!("https://x/first.png"))
        );
        assert_eq!(submission.parameters.get("size"), None);
    }
}
