//! Coordinate Allocator
//!
//! Maps a sequential slot index to a fixed grid cell. Cells are spaced so
//! that shells of distinct indices can never touch, which makes allocation a
//! pure function of the index: no search, no retries, no I/O.

use crate::config::DimensionConfig;
use crate::geometry::{BlockPos, Bounds, ChunkPos};

/// Everything derived from a slot index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellBounds {
    pub center: BlockPos,
    /// Usable volume
    pub inner: Bounds,
    /// Usable volume plus the shell
    pub outer: Bounds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    grid_width: u32,
    half_width: i64,
    half_height: i64,
    half_depth: i64,
    shell: i64,
    padding: i64,
    altitude: i64,
}

impl GridLayout {
    pub fn from_config(config: &DimensionConfig) -> Self {
        Self {
            grid_width: config.grid_width.max(1),
            half_width: config.half_width as i64,
            half_height: config.half_height as i64,
            half_depth: config.half_depth as i64,
            shell: config.shell_thickness as i64,
            padding: config.padding as i64,
            altitude: config.altitude,
        }
    }

    pub fn grid_width(&self) -> u32 {
        self.grid_width
    }

    /// Widest horizontal extent of the usable volume
    pub fn usable_width(&self) -> i64 {
        2 * self.half_width.max(self.half_depth) + 1
    }

    /// Distance between neighbouring centers
    pub fn spacing(&self) -> i64 {
        self.usable_width() + 2 * self.shell + self.padding
    }

    /// (column, row) of a slot
    pub fn grid_position(&self, index: u32) -> (i64, i64) {
        let width = self.grid_width as i64;
        let index = index as i64;
        (index % width, index / width)
    }

    /// Never fails. Layouts that pass `DimensionConfig::validate` place every
    /// index exactly; others saturate at the edge of the coordinate range.
    pub fn cell_for(&self, index: u32) -> CellBounds {
        let (gx, gz) = self.grid_position(index);
        let spacing = self.spacing();
        let center = BlockPos::new(gx.saturating_mul(spacing), self.altitude, gz.saturating_mul(spacing));
        let inner = Bounds::around(center, self.half_width, self.half_height, self.half_depth);
        let outer = inner.expand(self.shell);
        CellBounds { center, inner, outer }
    }

    /// Largest absolute block coordinate any slot's outer bounds reach, or
    /// `None` when the grid does not fit in `i64` coordinates.
    pub fn max_extent(&self) -> Option<i64> {
        let spacing = self.spacing();
        let last_row = (u32::MAX / self.grid_width) as i64;
        let last_column = self.grid_width as i64 - 1;
        let reach = self.half_width.max(self.half_depth).checked_add(self.shell)?;
        let horizontal = last_row.max(last_column).checked_mul(spacing)?.checked_add(reach)?;
        let vertical = self
            .altitude
            .checked_abs()?
            .checked_add(self.half_height)?
            .checked_add(self.shell)?;
        Some(horizontal.max(vertical))
    }

    /// Slot whose center lies closest to `pos`, if `pos` falls in the
    /// non-negative quadrant the grid occupies.
    pub fn index_near(&self, pos: BlockPos) -> Option<u32> {
        let spacing = self.spacing();
        let gx = pos.x.saturating_add(spacing / 2).div_euclid(spacing);
        let gz = pos.z.saturating_add(spacing / 2).div_euclid(spacing);
        if gx < 0 || gz < 0 || gx >= self.grid_width as i64 {
            return None;
        }
        u32::try_from(gz * self.grid_width as i64 + gx).ok()
    }

    /// Ownership-index cells for a set of outer bounds
    pub fn cell_keys(outer: &Bounds) -> Vec<ChunkPos> {
        outer.chunks().collect()
    }
}
