//! Block/chunk coordinates and inclusive axis-aligned bounds
//!
//! Coordinates are `i64` so that every slot index the allocator can hand out
//! maps to a representable position.

use serde::{Deserialize, Serialize};

/// Width of a chunk column along x and z.
pub const CHUNK_SIZE: i64 = 16;

// ============================================================================
// Positions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl BlockPos {
    pub const fn new(x: i64, y: i64, z: i64) -> Self {
        Self { x, y, z }
    }

    /// Saturates at the ends of the coordinate range
    pub fn offset(self, dx: i64, dy: i64, dz: i64) -> Self {
        Self::new(
            self.x.saturating_add(dx),
            self.y.saturating_add(dy),
            self.z.saturating_add(dz),
        )
    }

    pub fn up(self) -> Self {
        self.offset(0, 1, 0)
    }

    /// Chunk column containing this block
    pub fn chunk(self) -> ChunkPos {
        ChunkPos::new(self.x >> 4, self.z >> 4)
    }
}

/// Chunk column coordinate (block coordinate >> 4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ChunkPos {
    pub x: i64,
    pub z: i64,
}

impl ChunkPos {
    pub const fn new(x: i64, z: i64) -> Self {
        Self { x, z }
    }

    pub fn min_block_x(self) -> i64 {
        self.x * CHUNK_SIZE
    }

    pub fn min_block_z(self) -> i64 {
        self.z * CHUNK_SIZE
    }

    pub fn contains(self, pos: BlockPos) -> bool {
        pos.chunk() == self
    }
}

// ============================================================================
// Bounds
// ============================================================================

/// Inclusive box of block positions (`min` and `max` both belong to it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bounds {
    pub min: BlockPos,
    pub max: BlockPos,
}

impl Bounds {
    pub fn new(min: BlockPos, max: BlockPos) -> Self {
        Self { min, max }
    }

    /// Box of `half` blocks on each side of `center` along every axis.
    pub fn around(center: BlockPos, half_x: i64, half_y: i64, half_z: i64) -> Self {
        Self::new(
            center.offset(-half_x, -half_y, -half_z),
            center.offset(half_x, half_y, half_z),
        )
    }

    pub fn contains(&self, p: BlockPos) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
            && self.min.z <= other.max.z
            && other.min.z <= self.max.z
    }

    /// Grow (or shrink, with a negative amount) on every face.
    pub fn expand(&self, by: i64) -> Bounds {
        Bounds::new(self.min.offset(-by, -by, -by), self.max.offset(by, by, by))
    }

    /// (width, height, depth) in blocks
    pub fn size(&self) -> (i64, i64, i64) {
        (
            self.max.x - self.min.x + 1,
            self.max.y - self.min.y + 1,
            self.max.z - self.min.z + 1,
        )
    }

    pub fn volume(&self) -> u64 {
        let (w, h, d) = self.size();
        (w.max(0) * h.max(0) * d.max(0)) as u64
    }

    /// Every chunk column touched by these bounds.
    pub fn chunks(&self) -> impl Iterator<Item = ChunkPos> {
        let (x0, x1) = (self.min.x >> 4, self.max.x >> 4);
        let (z0, z1) = (self.min.z >> 4, self.max.z >> 4);
        (x0..=x1).flat_map(move |x| (z0..=z1).map(move |z| ChunkPos::new(x, z)))
    }

    /// Every position of `self` that is not inside `hole`.
    ///
    /// Columns that cross the hole only yield the y ranges above and below it.
    pub fn positions_outside(&self, hole: &Bounds) -> Vec<BlockPos> {
        let mut out = Vec::new();
        for x in self.min.x..=self.max.x {
            for z in self.min.z..=self.max.z {
                let column_in_hole =
                    x >= hole.min.x && x <= hole.max.x && z >= hole.min.z && z <= hole.max.z;
                for y in self.min.y..=self.max.y {
                    if column_in_hole && y >= hole.min.y && y <= hole.max.y {
                        continue;
                    }
                    out.push(BlockPos::new(x, y, z));
                }
            }
        }
        out
    }
}
