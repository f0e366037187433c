//! Controller configuration

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::scsi::ncr5390::ChipVariant;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ControllerConfig {
    /// Emulated chip variant
    pub variant: ChipVariant,

    /// Selection timeout after a single clock conversion unit instead of
    /// the value programmed in the select timeout register
    pub fast_select_timeout: bool,

    /// Input clocks per unit of the select timeout register
    pub select_timeout_scale: u32,

    /// Maximum bus notifications delivered before the bus has to settle
    pub max_deliveries: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            variant: ChipVariant::default(),
            fast_select_timeout: true,
            select_timeout_scale: 8192,
            max_deliveries: 10000,
        }
    }
}

impl ControllerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
