use indexmap::IndexMap;

pub const WAN_T2V: &str = "Wan-AI/Wan2.2-T2V";
pub const WAN_I2V: &str = "Wan-AI/Wan2.2-I2V";
pub const FLUX_DEV: &str = "black-forest-labs/flux.1-dev";
pub const FLUX_KONTEXT_PRO: &str = "black-forest-labs/flux-kontext-pro";
pub const FLUX_KONTEXT_PRO_MULTI: &str = "black-forest-labs/flux-kontext-pro/multi";
pub const FLUX_KONTEXT_PRO_T2I: &str = "black-forest-labs/flux-kontext-pro/text-to-image";
pub const FLUX_KONTEXT_MAX: &str = "black-forest-labs/flux-kontext-max";
pub const FLUX_KONTEXT_MAX_MULTI: &str = "black-forest-labs/flux-kontext-max/multi";
pub const STEP1X_EDIT: &str = "stepfun-ai/step1x-edit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub alias: Option<String>,
    pub capabilities: Vec<String>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }

    /// Async task models go through submit/poll; everything else is a one-shot call.
    pub fn is_async_task(&self) -> bool {
        self.supports("video")
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    /// Looks a model up by full id or short alias, case-insensitively.
    pub fn resolve(&self, name_or_alias: &str) -> Option<&ModelSpec> {
        let wanted = name_or_alias.trim();
        if let Some(model) = self.get(wanted) {
            return Some(model);
        }
        self.models.values().find(|model| {
            model.name.eq_ignore_ascii_case(wanted)
                || model
                    .alias
                    .as_deref()
                    .map(|alias| alias.eq_ignore_ascii_case(wanted))
                    .unwrap_or(false)
        })
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name_or_alias: &str, capability: &str) -> Result<ModelSpec, String> {
        if let Some(model) = self.resolve(name_or_alias) {
            if model.supports(capability) {
                return Ok(model.clone());
            }
        }
        let supported = self
            .by_capability(capability)
            .into_iter()
            .map(|model| model.alias.unwrap_or(model.name))
            .collect::<Vec<String>>();
        if supported.is_empty() {
            return Err(format!("No models available for capability '{capability}'."));
        }
        Err(format!(
            "Model '{}' unavailable for capability '{capability}'; supported: {}.",
            name_or_alias.trim(),
            supported.join(", ")
        ))
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, alias: &str, capabilities: &[&str]| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                alias: Some(alias.to_string()),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
            },
        );
    };

    insert(WAN_T2V, "wan-t2v", &["video", "text-to-video"]);
    insert(WAN_I2V, "wan-i2v", &["video", "image-to-video"]);
    insert(FLUX_DEV, "flux-dev", &["image", "text-to-image", "reference"]);
    insert(FLUX_KONTEXT_PRO, "kontext-pro", &["image", "edit"]);
    insert(FLUX_KONTEXT_PRO_MULTI, "kontext-pro-multi", &["image", "edit", "multi"]);
    insert(FLUX_KONTEXT_PRO_T2I, "kontext-t2i", &["image", "text-to-image"]);
    insert(FLUX_KONTEXT_MAX, "kontext-max", &["image", "edit"]);
    insert(FLUX_KONTEXT_MAX_MULTI, "kontext-max-multi", &["image", "edit", "multi"]);
    insert(STEP1X_EDIT, "step1x-edit", &["image", "edit"]);

    map
}
