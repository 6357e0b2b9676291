//! Engine-facing interfaces
//!
//! The dimension never talks to a game engine directly. Hosts implement
//! these traits; the `sandbox` module provides an in-memory implementation.
//! All implementations must be thread-safe (Send + Sync) because readers may
//! query them from a presentation thread.

use std::path::PathBuf;

use crate::components::{BiomeId, Block, Location, OwnerId};
use crate::error::EngineError;
use crate::geometry::{BlockPos, ChunkPos};
use crate::instance::Instance;

/// Block and biome storage of the backing world
pub trait BlockStore: Send + Sync {
    /// Block at `pos`; air when the chunk is not loaded
    fn block(&self, pos: BlockPos) -> Block;

    fn set_block(&self, pos: BlockPos, block: Block) -> Result<(), EngineError>;

    fn biome(&self, pos: BlockPos) -> BiomeId;

    fn set_biome(&self, pos: BlockPos, biome: BiomeId) -> Result<(), EngineError>;

    fn is_chunk_loaded(&self, chunk: ChunkPos) -> bool;

    /// Load (generating if needed) a chunk column
    fn load_chunk(&self, chunk: ChunkPos) -> Result<(), EngineError>;
}

/// The host process: backing world lifecycle, save location and occupants
pub trait WorldHost: Send + Sync {
    /// Try to bring the backing world online.
    ///
    /// `Ok(false)` means "not possible yet" (e.g. the primary world has not
    /// loaded); the caller retries later.
    fn bring_online(&self) -> Result<bool, EngineError>;

    fn take_offline(&self) -> Result<(), EngineError>;

    fn blocks(&self) -> &dyn BlockStore;

    /// Save directory of the backing world, once known
    fn save_dir(&self) -> Option<PathBuf>;

    /// Current location of an occupant, if connected
    fn locate(&self, occupant: OwnerId) -> Option<Location>;

    /// Move an occupant, leaving it with zero velocity
    fn relocate(&self, occupant: OwnerId, to: Location) -> Result<(), EngineError>;

    /// Occupants currently standing in the backing world
    fn occupants_in_backing_world(&self) -> usize;

    fn is_connected(&self, occupant: OwnerId) -> bool;

    /// Fallback exit target when no prior location is known
    fn home_spawn(&self, occupant: OwnerId) -> Location;
}

/// Fills a freshly materialized space. Invoked once per space; the
/// dimension latches `content_populated` whatever the outcome, but
/// implementations should still tolerate a second call.
pub trait ContentGenerator: Send + Sync {
    fn populate(
        &self,
        blocks: &dyn BlockStore,
        owner: OwnerId,
        anchor: BlockPos,
        max_radius: u32,
    ) -> Result<(), EngineError>;
}

/// Generator that leaves spaces as materialized
pub struct NoContent;

impl ContentGenerator for NoContent {
    fn populate(&self, _: &dyn BlockStore, _: OwnerId, _: BlockPos, _: u32) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Lifecycle notifications for collaborators. Listeners run on the tick
/// thread, in registration order.
pub trait DimensionListener: Send + Sync {
    fn on_instance_materialized(&self, _instance: &Instance) {}

    fn on_shell_breached(&self, _instance: &Instance) {}

    fn on_shell_restored(&self, _instance: &Instance) {}
}
