use serde::{Deserialize, Serialize};

use crate::timing::{CostTable, CpuGeneration};

/// Machine-level knobs for the execution core.
///
/// Lives outside [`crate::state::CpuState`] because it describes the modelled
/// CPU part rather than architectural state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub generation: CpuGeneration,
    /// The block recompiler is driving execution. Lets REP loops run longer
    /// per dispatch on 386+ parts.
    pub recompiler: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            generation: CpuGeneration::I486,
            recompiler: false,
        }
    }
}

impl CoreConfig {
    pub fn new(generation: CpuGeneration) -> Self {
        Self {
            generation,
            ..Self::default()
        }
    }

    pub fn costs(&self) -> &'static CostTable {
        self.generation.costs()
    }

    pub fn rep_slice(&self) -> i64 {
        self.costs().rep_slice(self.recompiler)
    }
}
