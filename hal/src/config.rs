use crate::{CodingType, CtxType, HalError};
use mppkit_device::DeviceConfig;
use serde::{Deserialize, Serialize};

/// Parameters of a HAL context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HalCfg {
    /// Context class.
    pub ctx_type: CtxType,
    /// Coding standard selecting the backend.
    pub coding: CodingType,
    /// Number of task slots; must be positive.
    pub task_count: i32,
    /// Channel settings handed to the backend.
    pub device: DeviceConfig,
}

impl HalCfg {
    /// Configuration with the default device settings.
    #[must_use]
    pub fn new(ctx_type: CtxType, coding: CodingType, task_count: i32) -> Self {
        Self {
            ctx_type,
            coding,
            task_count,
            device: DeviceConfig::default(),
        }
    }

    /// Replace the device settings.
    #[must_use]
    pub fn with_device(mut self, device: DeviceConfig) -> Self {
        self.device = device;
        self
    }

    /// Parse a JSON document; missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::InvalidArgument`] if the document is malformed.
    pub fn from_json(json: &str) -> Result<Self, HalError> {
        serde_json::from_str(json).map_err(|e| HalError::InvalidArgument(format!("config: {e}")))
    }
}

impl Default for HalCfg {
    fn default() -> Self {
        Self::new(CtxType::Dec, CodingType::Avc, 2)
    }
}
