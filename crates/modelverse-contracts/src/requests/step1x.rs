use serde_json::{json, Map, Value};

use super::{check_range, RANDOM_SEED};
use crate::models::STEP1X_EDIT;

/// Step1X instruction-based photo editing.
#[derive(Debug, Clone, PartialEq)]
pub struct Step1xEdit {
    pub prompt: String,
    pub image: String,
    pub negative_prompt: String,
    pub seed: i64,
    pub guidance_scale: f64,
    pub num_inference_steps: u32,
}

impl Step1xEdit {
    pub const MODEL: &'static str = STEP1X_EDIT;

    pub fn new(prompt: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            image: image.into(),
            negative_prompt: String::new(),
            seed: RANDOM_SEED,
            guidance_scale: 4.0,
            num_inference_steps: 30,
        }
    }

    pub(super) fn build_payload(&self) -> Result<Map<String, Value>, String> {
        if self.image.trim().is_empty() {
            return Err("Step1X edit needs an input image".to_string());
        }
        check_range("guidance_scale", self.guidance_scale, 0.0, 20.0)?;
        check_range("num_inference_steps", self.num_inference_steps, 1, 50)?;
        Ok(json!({
            "model": Self::MODEL,
            "prompt": self.prompt,
            "image": self.image,
            "negative_prompt": self.negative_prompt,
            "num_inference_steps": self.num_inference_steps,
            "guidance_scale": self.guidance_scale,
            "seed": self.seed,
        })
        .as_object()
        .cloned()
        .unwrap_or_default())
    }
}
