//! Payload builders for the one-shot `POST /v1/images/generations` endpoint.

mod flux;
mod step1x;

use serde_json::{Map, Value};

pub use flux::{FluxDev, FluxKontext, FluxKontextT2I, KontextTier, KONTEXT_ASPECT_RATIOS};
pub use step1x::Step1xEdit;

/// The service stores seeds as a signed 32-bit value; `-1` asks for a random one.
pub const SEED_MODULUS: i64 = 2_147_483_647;
pub const RANDOM_SEED: i64 = -1;

pub fn normalize_seed(seed: i64) -> i64 {
    if seed == RANDOM_SEED {
        return RANDOM_SEED;
    }
    seed.rem_euclid(SEED_MODULUS)
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageRequest {
    FluxDev(FluxDev),
    FluxKontext(FluxKontext),
    FluxKontextT2I(FluxKontextT2I),
    Step1xEdit(Step1xEdit),
}

impl ImageRequest {
    pub fn model(&self) -> &'static str {
        match self {
            Self::FluxDev(_) => FluxDev::MODEL,
            Self::FluxKontext(request) => request.model(),
            Self::FluxKontextT2I(_) => FluxKontextT2I::MODEL,
            Self::Step1xEdit(_) => Step1xEdit::MODEL,
        }
    }

    pub fn prompt(&self) -> &str {
        match self {
            Self::FluxDev(request) => &request.prompt,
            Self::FluxKontext(request) => &request.prompt,
            Self::FluxKontextT2I(request) => &request.prompt,
            Self::Step1xEdit(request) => &request.prompt,
        }
    }

    pub fn seed(&self) -> i64 {
        match self {
            Self::FluxDev(request) => request.seed,
            Self::FluxKontext(request) => request.seed,
            Self::FluxKontextT2I(request) => request.seed,
            Self::Step1xEdit(request) => request.seed,
        }
    }

    /// Copy for batch slot `index`: a fixed seed is offset by the slot, a random one stays random.
    pub fn for_slot(&self, index: u32) -> Self {
        let mut next = self.clone();
        let seed = self.seed();
        if seed != RANDOM_SEED {
            let shifted = seed.saturating_add(i64::from(index));
            match &mut next {
                Self::FluxDev(request) => request.seed = shifted,
                Self::FluxKontext(request) => request.seed = shifted,
                Self::FluxKontextT2I(request) => request.seed = shifted,
                Self::Step1xEdit(request) => request.seed = shifted,
            }
        }
        next
    }

    pub fn build_payload(&self) -> Result<Map<String, Value>, String> {
        if self.prompt().trim().is_empty() {
            return Err("Prompt is required".to_string());
        }
        let payload = match self {
            Self::FluxDev(request) => request.build_payload()?,
            Self::FluxKontext(request) => request.build_payload()?,
            Self::FluxKontextT2I(request) => request.build_payload()?,
            Self::Step1xEdit(request) => request.build_payload()?,
        };
        Ok(remove_empty_fields(payload))
    }
}

/// Drops null, empty-string and empty-object values from the top level.
pub fn remove_empty_fields(payload: Map<String, Value>) -> Map<String, Value> {
    payload
        .into_iter()
        .filter(|(_, value)| match value {
            Value::Null => false,
            Value::String(text) => !text.is_empty(),
            Value::Object(map) => !map.is_empty(),
            _ => true,
        })
        .collect()
}

fn check_range<T>(name: &str, value: T, min: T, max: T) -> Result<(), String>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    if value < min || value > max {
        return Err(format!("{name} must be between {min} and {max} (got {value})"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{normalize_seed, remove_empty_fields, FluxDev, ImageRequest, SEED_MODULUS};

    #[test]
    fn seed_normalisation_keeps_random_and_wraps_the_rest() {
        assert_eq!(normalize_seed(-1), -1);
        assert_eq!(normalize_seed(0), 0);
        assert_eq!(normalize_seed(42), 42);
        assert_eq!(normalize_seed(SEED_MODULUS), 0);
        assert_eq!(normalize_seed(SEED_MODULUS + 5), 5);
        assert_eq!(normalize_seed(-2), SEED_MODULUS - 2);
    }

    #[test]
    fn empty_fields_are_removed() {
        let mut payload = Map::new();
        payload.insert("prompt".to_string(), json!("boat"));
        payload.insert("image".to_string(), Value::Null);
        payload.insert("negative_prompt".to_string(), json!(""));
        payload.insert("extra".to_string(), json!({}));
        payload.insert("seed".to_string(), json!(0));
        payload.insert("images".to_string(), json!([]));

        let cleaned = remove_empty_fields(payload);
        let mut keys: Vec<&str> = cleaned.keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(keys, vec!["images", "prompt", "seed"]);
    }

    #[test]
    fn batch_slots_offset_fixed_seeds_only() {
        let mut fixed = FluxDev::new("boat");
        fixed.seed = 10;
        let request = ImageRequest::FluxDev(fixed);
        assert_eq!(request.for_slot(0).seed(), 10);
        assert_eq!(request.for_slot(3).seed(), 13);

        let random = ImageRequest::FluxDev(FluxDev::new("boat"));
        assert_eq!(random.for_slot(3).seed(), -1);
    }

    #[test]
    fn blank_prompt_is_rejected() {
        let request = ImageRequest::FluxDev(FluxDev::new("  "));
        assert_eq!(request.build_payload(), Err("Prompt is required".to_string()));
    }
}
