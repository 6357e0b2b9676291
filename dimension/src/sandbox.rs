//! Sandbox engine
//!
//! In-memory `WorldHost` + `BlockStore`. Chunk columns come from the
//! `VoidGenerator` and stay in storage across unloads (the "disk");
//! occupants live in a `hecs` world. Used by the benchmark binary and tests,
//! with switches for simulating an unavailable world or failing writes.

use dashmap::{DashMap, DashSet};
use hecs::{Entity, World};
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::components::{BiomeId, Block, Location, OwnerId, Realm, Velocity};
use crate::engine::{BlockStore, WorldHost};
use crate::error::EngineError;
use crate::generator::{ChunkData, VoidGenerator};
use crate::geometry::{BlockPos, ChunkPos};

pub struct SandboxWorld {
    generator: VoidGenerator,
    chunks: DashMap<ChunkPos, ChunkData>,
    loaded: DashSet<ChunkPos>,
    online: AtomicBool,
    /// Whether `bring_online` may succeed
    available: AtomicBool,
    fail_writes: AtomicBool,
    bring_online_calls: AtomicUsize,
    save_dir: RwLock<Option<PathBuf>>,
    occupants: Mutex<World>,
    entities: DashMap<OwnerId, Entity>,
    home: Location,
}

impl SandboxWorld {
    /// Offline sandbox; the first `bring_online` succeeds
    pub fn new(save_dir: Option<PathBuf>) -> Self {
        Self {
            generator: VoidGenerator::new(),
            chunks: DashMap::new(),
            loaded: DashSet::new(),
            online: AtomicBool::new(false),
            available: AtomicBool::new(true),
            fail_writes: AtomicBool::new(false),
            bring_online_calls: AtomicUsize::new(0),
            save_dir: RwLock::new(save_dir),
            occupants: Mutex::new(World::new()),
            entities: DashMap::new(),
            home: Location::new(Realm::Home(0), 0.5, 64.0, 0.5),
        }
    }

    /// Sandbox that is already online
    pub fn online(save_dir: Option<PathBuf>) -> Self {
        let world = Self::new(save_dir);
        world.online.store(true, Ordering::SeqCst);
        world
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make every block write fail with an engine error
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_save_dir(&self, dir: Option<PathBuf>) {
        *self.save_dir.write() = dir;
    }

    pub fn bring_online_calls(&self) -> usize {
        self.bring_online_calls.load(Ordering::SeqCst)
    }

    pub fn loaded_chunks(&self) -> usize {
        self.loaded.len()
    }

    pub fn stored_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Generate and load a batch of chunk columns in parallel
    pub fn preload(&self, positions: &[ChunkPos]) {
        let missing: Vec<ChunkPos> = positions
            .iter()
            .copied()
            .filter(|pos| !self.chunks.contains_key(pos))
            .collect();
        for chunk in self.generator.generate_many(&missing) {
            let pos = chunk.pos();
            if let Some(replaced) = self.chunks.insert(pos, chunk) {
                self.generator.recycle(replaced);
            }
        }
        for pos in positions {
            self.loaded.insert(*pos);
        }
    }

    /// Forget every stored chunk, as if the world save were lost
    pub fn discard_chunks(&self) {
        let keys: Vec<ChunkPos> = self.chunks.iter().map(|e| *e.key()).collect();
        for key in keys {
            if let Some((_, chunk)) = self.chunks.remove(&key) {
                self.generator.recycle(chunk);
            }
        }
        self.loaded.clear();
    }

    // ========================================================================
    // Occupants
    // ========================================================================

    pub fn spawn_occupant(&self, owner: OwnerId, at: Location) -> Entity {
        let entity = self.occupants.lock().spawn((owner, at, Velocity::default()));
        if let Some(previous) = self.entities.insert(owner, entity) {
            let _ = self.occupants.lock().despawn(previous);
        }
        entity
    }

    pub fn despawn_occupant(&self, owner: OwnerId) -> bool {
        match self.entities.remove(&owner) {
            Some((_, entity)) => self.occupants.lock().despawn(entity).is_ok(),
            None => false,
        }
    }

    pub fn set_velocity(&self, owner: OwnerId, velocity: Velocity) -> Result<(), EngineError> {
        let entity = self.entity(owner)?;
        let mut world = self.occupants.lock();
        let mut current = world
            .get::<&mut Velocity>(entity)
            .map_err(|_| EngineError::OccupantMissing(owner))?;
        *current = velocity;
        Ok(())
    }

    pub fn velocity(&self, owner: OwnerId) -> Option<Velocity> {
        let entity = self.entities.get(&owner).map(|e| *e.value())?;
        let world = self.occupants.lock();
        let velocity = world.get::<&Velocity>(entity).ok().map(|v| *v);
        velocity
    }

    fn entity(&self, owner: OwnerId) -> Result<Entity, EngineError> {
        self.entities
            .get(&owner)
            .map(|e| *e.value())
            .ok_or(EngineError::OccupantMissing(owner))
    }

    fn writable(&self, pos: BlockPos) -> Result<ChunkPos, EngineError> {
        if !self.is_online() {
            return Err(EngineError::Offline);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(EngineError::Other("injected write failure".into()));
        }
        let chunk = pos.chunk();
        if !self.loaded.contains(&chunk) {
            return Err(EngineError::ChunkNotLoaded(chunk));
        }
        Ok(chunk)
    }
}

impl BlockStore for SandboxWorld {
    fn block(&self, pos: BlockPos) -> Block {
        let chunk = pos.chunk();
        if !self.loaded.contains(&chunk) {
            return Block::Air;
        }
        self.chunks
            .get(&chunk)
            .map(|c| c.block(pos))
            .unwrap_or_default()
    }

    fn set_block(&self, pos: BlockPos, block: Block) -> Result<(), EngineError> {
        let chunk = self.writable(pos)?;
        let mut data = self
            .chunks
            .get_mut(&chunk)
            .ok_or(EngineError::ChunkNotLoaded(chunk))?;
        data.set_block(pos, block);
        Ok(())
    }

    fn biome(&self, pos: BlockPos) -> BiomeId {
        self.chunks
            .get(&pos.chunk())
            .map(|c| c.biome(pos))
            .unwrap_or(self.generator.biome())
    }

    fn set_biome(&self, pos: BlockPos, biome: BiomeId) -> Result<(), EngineError> {
        let chunk = self.writable(pos)?;
        let mut data = self
            .chunks
            .get_mut(&chunk)
            .ok_or(EngineError::ChunkNotLoaded(chunk))?;
        data.set_biome(pos, biome);
        Ok(())
    }

    fn is_chunk_loaded(&self, chunk: ChunkPos) -> bool {
        self.loaded.contains(&chunk)
    }

    fn load_chunk(&self, chunk: ChunkPos) -> Result<(), EngineError> {
        if !self.is_online() {
            return Err(EngineError::Offline);
        }
        self.chunks
            .entry(chunk)
            .or_insert_with(|| self.generator.generate(chunk));
        self.loaded.insert(chunk);
        Ok(())
    }
}

impl WorldHost for SandboxWorld {
    fn bring_online(&self) -> Result<bool, EngineError> {
        self.bring_online_calls.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.online.store(true, Ordering::SeqCst);
        Ok(true)
    }

    fn take_offline(&self) -> Result<(), EngineError> {
        self.online.store(false, Ordering::SeqCst);
        self.loaded.clear();
        Ok(())
    }

    fn blocks(&self) -> &dyn BlockStore {
        self
    }

    fn save_dir(&self) -> Option<PathBuf> {
        self.save_dir.read().clone()
    }

    fn locate(&self, occupant: OwnerId) -> Option<Location> {
        let entity = self.entities.get(&occupant).map(|e| *e.value())?;
        let world = self.occupants.lock();
        let location = world.get::<&Location>(entity).ok().map(|l| *l);
        location
    }

    fn relocate(&self, occupant: OwnerId, to: Location) -> Result<(), EngineError> {
        let entity = self.entity(occupant)?;
        let mut world = self.occupants.lock();
        let (location, velocity) = world
            .query_one_mut::<(&mut Location, &mut Velocity)>(entity)
            .map_err(|_| EngineError::OccupantMissing(occupant))?;
        *location = to;
        *velocity = Velocity::default();
        Ok(())
    }

    fn occupants_in_backing_world(&self) -> usize {
        self.occupants
            .lock()
            .query::<&Location>()
            .iter()
            .filter(|(_, loc)| loc.realm == Realm::Backing)
            .count()
    }

    fn is_connected(&self, occupant: OwnerId) -> bool {
        self.entities.contains_key(&occupant)
    }

    fn home_spawn(&self, _occupant: OwnerId) -> Location {
        self.home
    }
}
