//! Materialize System
//!
//! Writes a space into the backing world: anchor shell, cleared interior,
//! patterned floor and lights. Spaces whose shell is already present (a lost
//! snapshot, a re-created record) are detected and left alone.

use tracing::debug;

use crate::components::Block;
use crate::engine::BlockStore;
use crate::error::EngineError;
use crate::geometry::{BlockPos, Bounds};
use crate::instance::Instance;

/// Sample points that must be loaded before the anchor count means anything
const MIN_PROBES_CHECKED: usize = 4;
const MIN_ANCHOR_HITS: usize = 3;

/// Spacing of wall lights along each inner face
const WALL_LIGHT_STEP: usize = 10;
/// Wall lights hang this far above the floor
const WALL_LIGHT_HEIGHT: i64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterializeOutcome {
    /// Number of blocks written
    Written(usize),
    /// A shell was found in place; nothing was written
    AlreadyPresent,
}

/// Materialize one space. Chunks covering the outer bounds are loaded first.
pub fn materialize_system(
    blocks: &dyn BlockStore,
    instance: &Instance,
) -> Result<MaterializeOutcome, EngineError> {
    load_chunks(blocks, &instance.outer)?;

    if detect_existing_shell(blocks, instance) {
        debug!(owner = %instance.owner, index = instance.index, "shell already present");
        return Ok(MaterializeOutcome::AlreadyPresent);
    }

    let mut written = 0;

    for pos in instance.outer.positions_outside(&instance.inner) {
        blocks.set_block(pos, Block::Anchor)?;
        written += 1;
    }

    let inner = instance.inner;
    for x in inner.min.x..=inner.max.x {
        for z in inner.min.z..=inner.max.z {
            for y in inner.min.y..=inner.max.y {
                let pos = BlockPos::new(x, y, z);
                if !blocks.block(pos).is_air() {
                    blocks.set_block(pos, Block::Air)?;
                    written += 1;
                }
            }
        }
    }

    written += lay_floor(blocks, instance)?;
    written += place_lights(blocks, instance)?;

    Ok(MaterializeOutcome::Written(written))
}

/// Whether a shell from an earlier run is already standing.
///
/// Twelve shell samples (eight corners, four wall midpoints): at least
/// `MIN_ANCHOR_HITS` anchors over `MIN_PROBES_CHECKED` loaded samples, or a
/// floor block under the center, counts as present.
pub fn detect_existing_shell(blocks: &dyn BlockStore, instance: &Instance) -> bool {
    let (o, c) = (instance.outer, instance.center);
    let samples = [
        BlockPos::new(o.min.x, o.min.y, o.min.z),
        BlockPos::new(o.max.x, o.min.y, o.min.z),
        BlockPos::new(o.min.x, o.min.y, o.max.z),
        BlockPos::new(o.max.x, o.min.y, o.max.z),
        BlockPos::new(o.min.x, o.max.y, o.min.z),
        BlockPos::new(o.max.x, o.max.y, o.min.z),
        BlockPos::new(o.min.x, o.max.y, o.max.z),
        BlockPos::new(o.max.x, o.max.y, o.max.z),
        BlockPos::new(o.min.x, c.y, c.z),
        BlockPos::new(o.max.x, c.y, c.z),
        BlockPos::new(c.x, c.y, o.min.z),
        BlockPos::new(c.x, c.y, o.max.z),
    ];

    let mut checked = 0;
    let mut hits = 0;
    for pos in samples {
        if !blocks.is_chunk_loaded(pos.chunk()) {
            continue;
        }
        checked += 1;
        if blocks.block(pos).is_anchor() {
            hits += 1;
        }
    }
    if checked >= MIN_PROBES_CHECKED && hits >= MIN_ANCHOR_HITS {
        return true;
    }

    let under_center = BlockPos::new(c.x, instance.floor_y(), c.z);
    blocks.is_chunk_loaded(under_center.chunk()) && blocks.block(under_center).is_floor()
}

pub(crate) fn load_chunks(blocks: &dyn BlockStore, bounds: &Bounds) -> Result<(), EngineError> {
    for chunk in bounds.chunks() {
        if !blocks.is_chunk_loaded(chunk) {
            blocks.load_chunk(chunk)?;
        }
    }
    Ok(())
}

/// Floor pattern: light 3x3 core, accent 5x5 ring, plain floor elsewhere
fn floor_block(dx: i64, dz: i64) -> Block {
    match dx.abs().max(dz.abs()) {
        0..=1 => Block::FloorLight,
        2 => Block::FloorAccent,
        _ => Block::Floor,
    }
}

fn lay_floor(blocks: &dyn BlockStore, instance: &Instance) -> Result<usize, EngineError> {
    let (inner, c, y) = (instance.inner, instance.center, instance.floor_y());
    let mut written = 0;
    for x in inner.min.x..=inner.max.x {
        for z in inner.min.z..=inner.max.z {
            blocks.set_block(BlockPos::new(x, y, z), floor_block(x - c.x, z - c.z))?;
            written += 1;
        }
    }
    Ok(written)
}

fn place_lights(blocks: &dyn BlockStore, instance: &Instance) -> Result<usize, EngineError> {
    let (inner, floor) = (instance.inner, instance.floor_y());
    let mut written = 0;

    // Corner lamps: a light with a rod on top, two blocks in from the walls
    for (x, z) in [
        (inner.min.x + 2, inner.min.z + 2),
        (inner.max.x - 2, inner.min.z + 2),
        (inner.min.x + 2, inner.max.z - 2),
        (inner.max.x - 2, inner.max.z - 2),
    ] {
        blocks.set_block(BlockPos::new(x, floor + 1, z), Block::Light)?;
        blocks.set_block(BlockPos::new(x, floor + 2, z), Block::LightRod)?;
        written += 2;
    }

    let y = (floor + WALL_LIGHT_HEIGHT).min(inner.max.y);
    let mut wall = Vec::new();
    for z in (inner.min.z..=inner.max.z).step_by(WALL_LIGHT_STEP) {
        wall.push(BlockPos::new(inner.min.x, y, z));
        wall.push(BlockPos::new(inner.max.x, y, z));
    }
    for x in (inner.min.x..=inner.max.x).step_by(WALL_LIGHT_STEP) {
        wall.push(BlockPos::new(x, y, inner.min.z));
        wall.push(BlockPos::new(x, y, inner.max.z));
    }
    wall.sort_by_key(|p| (p.x, p.z));
    wall.dedup();
    for pos in wall {
        blocks.set_block(pos, Block::Light)?;
        written += 1;
    }

    Ok(written)
}
