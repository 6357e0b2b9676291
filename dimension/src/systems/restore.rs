//! Restore System
//!
//! Puts anchor material back at every shell coordinate that lost it.

use crate::components::Block;
use crate::engine::BlockStore;
use crate::error::EngineError;
use crate::instance::Instance;
use crate::systems::materialize::load_chunks;

/// Repair the shell of one space. Returns the number of coordinates fixed.
pub fn restore_system(blocks: &dyn BlockStore, instance: &Instance) -> Result<usize, EngineError> {
    load_chunks(blocks, &instance.outer)?;

    let mut repaired = 0;
    for pos in instance.outer.positions_outside(&instance.inner) {
        if !blocks.block(pos).is_anchor() {
            blocks.set_block(pos, Block::Anchor)?;
            repaired += 1;
        }
    }
    Ok(repaired)
}
