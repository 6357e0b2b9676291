//! Empty-World Generator
//!
//! Produces the blank, single-biome chunks of the backing world. This runs
//! on the engine's chunk-generation hot path, so chunk buffers are recycled
//! through a small per-thread pool instead of being allocated per call.

use rayon::prelude::*;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::components::{BiomeId, Block};
use crate::geometry::{BlockPos, ChunkPos, CHUNK_SIZE};

/// Buffers kept per worker thread
const POOL_LIMIT: usize = 8;

const COLUMNS: usize = (CHUNK_SIZE * CHUNK_SIZE) as usize;

thread_local! {
    static CHUNK_POOL: RefCell<Vec<ChunkData>> = RefCell::new(Vec::new());
}

// ============================================================================
// Chunk Data
// ============================================================================

/// One chunk column: a biome tag per x/z column and sparse block storage
/// (absent means air).
#[derive(Debug, Clone)]
pub struct ChunkData {
    pos: ChunkPos,
    biomes: Vec<BiomeId>,
    blocks: HashMap<BlockPos, Block>,
}

impl ChunkData {
    fn empty(pos: ChunkPos, biome: BiomeId) -> Self {
        Self {
            pos,
            biomes: vec![biome; COLUMNS],
            blocks: HashMap::new(),
        }
    }

    /// Reuse this buffer for another position, keeping its capacity
    fn reset(&mut self, pos: ChunkPos, biome: BiomeId) {
        self.pos = pos;
        self.blocks.clear();
        self.biomes.resize(COLUMNS, biome);
        self.biomes.fill(biome);
    }

    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    pub fn block(&self, pos: BlockPos) -> Block {
        self.blocks.get(&pos).copied().unwrap_or(Block::Air)
    }

    pub fn set_block(&mut self, pos: BlockPos, block: Block) {
        debug_assert!(self.pos.contains(pos));
        if block.is_air() {
            self.blocks.remove(&pos);
        } else {
            self.blocks.insert(pos, block);
        }
    }

    pub fn biome(&self, pos: BlockPos) -> BiomeId {
        self.biomes[Self::column(pos)]
    }

    pub fn set_biome(&mut self, pos: BlockPos, biome: BiomeId) {
        let column = Self::column(pos);
        self.biomes[column] = biome;
    }

    pub fn biomes(&self) -> &[BiomeId] {
        &self.biomes
    }

    /// Number of non-air blocks
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    fn column(pos: BlockPos) -> usize {
        let x = pos.x.rem_euclid(CHUNK_SIZE) as usize;
        let z = pos.z.rem_euclid(CHUNK_SIZE) as usize;
        z * CHUNK_SIZE as usize + x
    }
}

// ============================================================================
// Generator
// ============================================================================

/// Natural spawn entry of a biome. The void biome has none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnEntry {
    pub kind: String,
    pub weight: u32,
}

#[derive(Debug, Default)]
pub struct GeneratorStats {
    pub generated: AtomicU64,
    /// Generations served from a recycled buffer
    pub reused: AtomicU64,
}

pub struct VoidGenerator {
    biome: BiomeId,
    stats: GeneratorStats,
}

impl VoidGenerator {
    pub fn new() -> Self {
        Self::with_biome(BiomeId::VOID)
    }

    pub fn with_biome(biome: BiomeId) -> Self {
        Self {
            biome,
            stats: GeneratorStats::default(),
        }
    }

    pub fn biome(&self) -> BiomeId {
        self.biome
    }

    pub fn stats(&self) -> &GeneratorStats {
        &self.stats
    }

    /// Generate an empty chunk column.
    ///
    /// Uses a pooled buffer when this thread has one; otherwise (empty pool,
    /// pool borrowed re-entrantly, thread shutting down) allocates a new one.
    pub fn generate(&self, pos: ChunkPos) -> ChunkData {
        self.stats.generated.fetch_add(1, Ordering::Relaxed);
        match take_pooled() {
            Some(mut chunk) => {
                self.stats.reused.fetch_add(1, Ordering::Relaxed);
                chunk.reset(pos, self.biome);
                chunk
            }
            None => ChunkData::empty(pos, self.biome),
        }
    }

    /// Generate a batch on the rayon pool; each worker draws from its own pool.
    pub fn generate_many(&self, positions: &[ChunkPos]) -> Vec<ChunkData> {
        positions.par_iter().map(|pos| self.generate(*pos)).collect()
    }

    /// Hand a chunk buffer back to this thread's pool
    pub fn recycle(&self, chunk: ChunkData) {
        let _ = CHUNK_POOL.try_with(move |pool| {
            if let Ok(mut pool) = pool.try_borrow_mut() {
                if pool.len() < POOL_LIMIT {
                    pool.push(chunk);
                }
            }
        });
    }

    /// Natural spawn candidates; the backing world has none
    pub fn spawn_candidates(&self, _chunk: ChunkPos) -> Vec<SpawnEntry> {
        Vec::new()
    }

    /// Nearest generated structure; the backing world has none
    pub fn nearest_structure(&self, _pos: BlockPos) -> Option<BlockPos> {
        None
    }
}

impl Default for VoidGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn take_pooled() -> Option<ChunkData> {
    CHUNK_POOL
        .try_with(|pool| pool.try_borrow_mut().ok().and_then(|mut pool| pool.pop()))
        .ok()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_is_empty_void() {
        let gen = VoidGenerator::new();
        let chunk = gen.generate(ChunkPos::new(3, -2));
        assert_eq!(chunk.pos(), ChunkPos::new(3, -2));
        assert_eq!(chunk.block_count(), 0);
        assert_eq!(chunk.biomes().len(), 256);
        assert!(chunk.biomes().iter().all(|b| *b == BiomeId::VOID));
        assert!(gen.spawn_candidates(chunk.pos()).is_empty());
        assert!(gen.nearest_structure(BlockPos::new(0, 64, 0)).is_none());
    }

    #[test]
    fn test_recycled_buffer_is_reset() {
        let gen = VoidGenerator::new();
        let mut chunk = gen.generate(ChunkPos::new(0, 0));
        chunk.set_block(BlockPos::new(1, 70, 1), Block::Anchor);
        chunk.set_biome(BlockPos::new(1, 70, 1), BiomeId(3));
        gen.recycle(chunk);

        let again = gen.generate(ChunkPos::new(5, 5));
        assert_eq!(gen.stats().reused.load(Ordering::Relaxed), 1);
        assert_eq!(again.pos(), ChunkPos::new(5, 5));
        assert_eq!(again.block_count(), 0);
        assert!(again.biomes().iter().all(|b| *b == BiomeId::VOID));
    }

    #[test]
    fn test_negative_coordinates_map_to_columns() {
        let gen = VoidGenerator::new();
        let mut chunk = gen.generate(ChunkPos::new(-1, -1));
        let pos = BlockPos::new(-1, 10, -16);
        chunk.set_biome(pos, BiomeId(9));
        assert_eq!(chunk.biome(pos), BiomeId(9));
        chunk.set_block(pos, Block::Floor);
        assert_eq!(chunk.block(pos), Block::Floor);
        chunk.set_block(pos, Block::Air);
        assert_eq!(chunk.block_count(), 0);
    }

    #[test]
    fn test_generate_many() {
        let gen = VoidGenerator::new();
        let positions: Vec<ChunkPos> = (0..64).map(|i| ChunkPos::new(i % 8, i / 8)).collect();
        let chunks = gen.generate_many(&positions);
        assert_eq!(chunks.len(), 64);
        assert!(chunks.iter().zip(&positions).all(|(c, p)| c.pos() == *p));
        assert_eq!(gen.stats().generated.load(Ordering::Relaxed), 64);
    }
}
