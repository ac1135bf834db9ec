use std::collections::BTreeMap;
use std::sync::Arc;

use chunkspace_format::ChunkSource;
use chunkspace_kernel::{DirMapping, Space};
use glam::{Affine3A, Vec3};

use crate::budget::{StreamConfig, StreamStats};
use crate::error::StreamError;
use crate::manager::ChunkManager;

pub type SpaceId = u32;
pub type SpaceMap = BTreeMap<SpaceId, Space>;

/// Every space of a universe plus the manager that streams them. Passed
/// explicitly to whatever needs the world.
#[derive(Debug)]
pub struct WorldContext {
    spaces: SpaceMap,
    manager: ChunkManager,
}

impl WorldContext {
    pub fn new(config: StreamConfig) -> Result<Self, StreamError> {
        Ok(Self {
            spaces: SpaceMap::new(),
            manager: ChunkManager::new(config)?,
        })
    }

    /// The space with `id`, created empty when missing.
    pub fn space_mut(&mut self, id: SpaceId) -> &mut Space {
        self.spaces.entry(id).or_default()
    }

    pub fn space(&self, id: SpaceId) -> Option<&Space> {
        self.spaces.get(&id)
    }

    pub fn spaces(&self) -> &SpaceMap {
        &self.spaces
    }

    /// Drop a space. Loads still in flight for it are discarded when they
    /// finish.
    pub fn del_space(&mut self, id: SpaceId) -> Option<Space> {
        self.spaces.remove(&id)
    }

    /// Place a chunk directory into a space.
    pub fn add_mapping(
        &mut self,
        space: SpaceId,
        source: Arc<dyn ChunkSource>,
        mapper: Affine3A,
    ) -> Result<Arc<DirMapping>, StreamError> {
        Ok(self.space_mut(space).add_mapping(source, mapper)?)
    }

    pub fn set_camera(&mut self, space: SpaceId, position: Vec3) {
        self.manager.set_camera(space, position);
    }

    pub fn manager(&self) -> &ChunkManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut ChunkManager {
        &mut self.manager
    }

    pub fn tick(&mut self, dt: f32) -> Result<&StreamStats, StreamError> {
        self.manager.tick(&mut self.spaces, dt)
    }

    /// Wait for every queued load and bind it.
    pub fn flush(&mut self) -> Result<(), StreamError> {
        self.manager.flush(&mut self.spaces)
    }
}
