use serde::{Deserialize, Serialize};

use crate::cpu::CpuConfig;
use crate::memory::Access;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Load address of the image; must be page aligned.
    pub base: u32,
    pub text_access: Access,
    /// Size of the stack region placed after the image. Zero disables it.
    pub stack_size: u32,
    /// Entry point symbol; the image base is used when it is undefined.
    pub entry_symbol: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            base: 0,
            text_access: Access::all(),
            stack_size: 0x1_0000,
            entry_symbol: "_start".to_string(),
        }
    }
}

/// Everything `rv32-run` can be configured with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub cpu: CpuConfig,
    pub link: LinkConfig,
}

impl RunConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
