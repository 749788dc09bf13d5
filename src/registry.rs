//! Surface bookkeeping for a computation run.
//!
//! Registration happens before any dispatch begins; afterwards the registry
//! is read-only. Iteration order is registration order, which is also the
//! row/column order of the dense matrix export.

use indexmap::IndexMap;

use crate::error::{Result, VfError};
use crate::surface::{Surface, SurfaceId};

#[derive(Debug, Default, Clone)]
pub struct SurfaceRegistry {
    surfaces: IndexMap<SurfaceId, Surface>,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self {
            surfaces: IndexMap::new(),
        }
    }

    /// Registers a surface, failing if its id is already taken. Registered
    /// surfaces are immutable; to replace one, unregister it first.
    pub fn register(&mut self, surface: Surface) -> Result<&SurfaceId> {
        if self.surfaces.contains_key(surface.id()) {
            return Err(VfError::DuplicateId(surface.id().to_string()));
        }
        let id = surface.id().clone();
        let entry = self.surfaces.entry(id).or_insert(surface);
        Ok(entry.id())
    }

    pub fn get(&self, id: &SurfaceId) -> Result<&Surface> {
        self.surfaces
            .get(id)
            .ok_or_else(|| VfError::UnknownSurface(id.to_string()))
    }

    pub fn contains(&self, id: &SurfaceId) -> bool {
        self.surfaces.contains_key(id)
    }

    /// Removes and returns a surface. `shift_remove` keeps the registration
    /// order of the remaining surfaces intact.
    pub fn unregister(&mut self, id: &SurfaceId) -> Result<Surface> {
        self.surfaces
            .shift_remove(id)
            .ok_or_else(|| VfError::UnknownSurface(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    /// Ids in registration order.
    pub fn ids(&self) -> Vec<SurfaceId> {
        self.surfaces.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Surface> {
        self.surfaces.values()
    }
}
