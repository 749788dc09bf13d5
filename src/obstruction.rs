//! Obstruction-scene pass-through.
//!
//! Blocking geometry reaches the engine as a prebuilt binary octree
//! (produced externally with `oconv`). This crate only carries the
//! reference: when present it is appended to every engine invocation,
//! when absent the computation is direct and unobstructed.

use std::path::{Path, PathBuf};

use crate::error::{Result, VfError};

#[derive(Debug, Clone, Default)]
pub struct ObstructionResolver {
    octree: Option<PathBuf>,
}

impl ObstructionResolver {
    /// No obstruction scene; pairs see each other directly.
    pub fn none() -> Self {
        Self { octree: None }
    }

    /// Uses a prebuilt octree file for every pair of the run.
    pub fn with_octree(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(VfError::InvalidConfig(format!(
                "obstruction octree not found: {}",
                path.display()
            )));
        }
        Ok(Self { octree: Some(path) })
    }

    pub fn resolve(&self) -> Option<&Path> {
        self.octree.as_deref()
    }
}
