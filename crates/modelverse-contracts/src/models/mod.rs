mod registry;

pub use registry::{
    ModelRegistry, ModelSpec, FLUX_DEV, FLUX_KONTEXT_MAX, FLUX_KONTEXT_MAX_MULTI, FLUX_KONTEXT_PRO,
    FLUX_KONTEXT_PRO_MULTI, FLUX_KONTEXT_PRO_T2I, STEP1X_EDIT, WAN_I2V, WAN_T2V,
};
