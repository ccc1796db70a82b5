use serde_json::{json, Map, Value};

use super::{check_range, RANDOM_SEED};
use crate::models::{
    FLUX_DEV, FLUX_KONTEXT_MAX, FLUX_KONTEXT_MAX_MULTI, FLUX_KONTEXT_PRO, FLUX_KONTEXT_PRO_MULTI,
    FLUX_KONTEXT_PRO_T2I,
};

pub const KONTEXT_ASPECT_RATIOS: [&str; 9] = [
    "21:9", "16:9", "16:10", "4:3", "1:1", "3:4", "10:16", "9:16", "9:21",
];

/// Flux dev text-to-image, optionally steered by one reference image.
#[derive(Debug, Clone, PartialEq)]
pub struct FluxDev {
    pub prompt: String,
    pub image: Option<String>,
    pub strength: f64,
    pub guidance_scale: f64,
    pub num_images: u32,
    pub num_inference_steps: u32,
    pub seed: i64,
    pub width: u32,
    pub height: u32,
}

impl FluxDev {
    pub const MODEL: &'static str = FLUX_DEV;

    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            image: None,
            strength: 0.8,
            guidance_scale: 3.5,
            num_images: 1,
            num_inference_steps: 28,
            seed: RANDOM_SEED,
            width: 1024,
            height: 1024,
        }
    }

    pub(super) fn build_payload(&self) -> Result<Map<String, Value>, String> {
        check_range("width", self.width, 256, 1536)?;
        check_range("height", self.height, 256, 1536)?;
        check_range("strength", self.strength, 0.0, 1.0)?;
        check_range("num_images", self.num_images, 1, 4)?;
        check_range("num_inference_steps", self.num_inference_steps, 1, 50)?;
        Ok(object(json!({
            "model": Self::MODEL,
            "prompt": self.prompt,
            "image": self.image,
            "guidance_scale": self.guidance_scale,
            "n": self.num_images,
            "steps": self.num_inference_steps,
            "seed": self.seed,
            "size": format!("{}x{}", self.width, self.height),
            "strength": self.strength,
            "response_format": "url",
        })))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KontextTier {
    Pro,
    Max,
}

/// Flux Kontext editing. One image uses the single endpoint, several use `/multi`.
#[derive(Debug, Clone, PartialEq)]
pub struct FluxKontext {
    pub tier: KontextTier,
    pub prompt: String,
    pub images: Vec<String>,
    pub guidance_scale: f64,
    pub seed: i64,
}

impl FluxKontext {
    pub fn new(tier: KontextTier, prompt: impl Into<String>, images: Vec<String>) -> Self {
        Self {
            tier,
            prompt: prompt.into(),
            images,
            guidance_scale: 3.5,
            seed: RANDOM_SEED,
        }
    }

    pub fn model(&self) -> &'static str {
        let multi = self
            .images
            .iter()
            .filter(|image| !image.trim().is_empty())
            .count()
            > 1;
        match (self.tier, multi) {
            (KontextTier::Pro, false) => FLUX_KONTEXT_PRO,
            (KontextTier::Pro, true) => FLUX_KONTEXT_PRO_MULTI,
            (KontextTier::Max, false) => FLUX_KONTEXT_MAX,
            (KontextTier::Max, true) => FLUX_KONTEXT_MAX_MULTI,
        }
    }

    pub(super) fn build_payload(&self) -> Result<Map<String, Value>, String> {
        let images: Vec<&String> = self
            .images
            .iter()
            .filter(|image| !image.trim().is_empty())
            .collect();
        if images.is_empty() {
            return Err("Flux Kontext needs at least one input image".to_string());
        }
        let mut payload = object(json!({
            "model": self.model(),
            "prompt": self.prompt,
            "guidance_scale": self.guidance_scale,
            "seed": self.seed,
        }));
        if images.len() == 1 {
            payload.insert("image".to_string(), json!(images[0]));
        } else {
            payload.insert("images".to_string(), json!(images));
        }
        Ok(payload)
    }
}

/// Flux Kontext Pro text-to-image.
#[derive(Debug, Clone, PartialEq)]
pub struct FluxKontextT2I {
    pub prompt: String,
    pub aspect_ratio: String,
    pub num_images: u32,
    pub guidance_scale: f64,
    pub seed: i64,
}

impl FluxKontextT2I {
    pub const MODEL: &'static str = FLUX_KONTEXT_PRO_T2I;

    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            aspect_ratio: "1:1".to_string(),
            num_images: 1,
            guidance_scale: 3.5,
            seed: RANDOM_SEED,
        }
    }

    pub(super) fn build_payload(&self) -> Result<Map<String, Value>, String> {
        if !KONTEXT_ASPECT_RATIOS.contains(&self.aspect_ratio.as_str()) {
            return Err(format!(
                "aspect_ratio must be one of {} (got {})",
                KONTEXT_ASPECT_RATIOS.join(", "),
                self.aspect_ratio
            ));
        }
        check_range("num_images", self.num_images, 1, 4)?;
        Ok(object(json!({
            "model": Self::MODEL,
            "prompt": self.prompt,
            "aspect_ratio": self.aspect_ratio,
            "n": self.num_images,
            "guidance_scale": self.guidance_scale,
            "seed": self.seed,
        })))
    }
}

fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
