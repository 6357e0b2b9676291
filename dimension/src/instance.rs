//! Instance records
//!
//! An instance is one owner's pocket space. Only the stable fields are
//! persisted; center and bounds are always re-derived from the slot index.

use chrono::{DateTime, Utc};

use crate::allocator::GridLayout;
use crate::components::{Location, OwnerId, Realm};
use crate::geometry::{BlockPos, Bounds};
use crate::scheduler::TaskKind;

/// Lifecycle position of an instance.
///
/// `Requested → Queued(Materialize) → Materialized → ShellBreached →
/// Queued(RestoreShell) → Materialized`. A breach can recur any number of times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceState {
    /// Record exists, nothing scheduled yet (e.g. restored unmaterialized)
    Requested,
    Queued(TaskKind),
    Materialized,
    ShellBreached,
}

/// Where a coordinate falls relative to one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Zone {
    Inner,
    Shell,
    Outside,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub owner: OwnerId,
    pub display_name: String,
    pub index: u32,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,

    // Derived from `index`
    pub center: BlockPos,
    pub inner: Bounds,
    pub outer: Bounds,

    pub materialized: bool,
    /// One-shot latch for the external content generator
    pub content_populated: bool,
    pub active: bool,
    pub shell_breached: bool,
    pub state: InstanceState,
}

impl Instance {
    pub fn new(
        owner: OwnerId,
        display_name: impl Into<String>,
        index: u32,
        layout: &GridLayout,
        now: DateTime<Utc>,
    ) -> Self {
        let cell = layout.cell_for(index);
        Self {
            owner,
            display_name: display_name.into(),
            index,
            created_at: now,
            last_active: now,
            center: cell.center,
            inner: cell.inner,
            outer: cell.outer,
            materialized: false,
            content_populated: false,
            active: true,
            shell_breached: false,
            state: InstanceState::Requested,
        }
    }

    /// Move to another slot. Whatever was written at the old slot is not ours
    /// any more, so the space has to be materialized again.
    pub fn reindex(&mut self, index: u32, layout: &GridLayout) {
        let cell = layout.cell_for(index);
        self.index = index;
        self.center = cell.center;
        self.inner = cell.inner;
        self.outer = cell.outer;
        self.materialized = false;
        self.content_populated = false;
        self.shell_breached = false;
        self.state = InstanceState::Requested;
    }

    pub fn zone(&self, pos: BlockPos) -> Zone {
        if self.inner.contains(pos) {
            Zone::Inner
        } else if self.outer.contains(pos) {
            Zone::Shell
        } else {
            Zone::Outside
        }
    }

    pub fn is_inner(&self, pos: BlockPos) -> bool {
        self.inner.contains(pos)
    }

    pub fn is_shell(&self, pos: BlockPos) -> bool {
        self.zone(pos) == Zone::Shell
    }

    /// Horizontal square of `radius` around the center, any height
    pub fn in_territory(&self, pos: BlockPos, radius: u32) -> bool {
        let radius = radius as i64;
        (pos.x - self.center.x).abs() <= radius && (pos.z - self.center.z).abs() <= radius
    }

    /// Floor level of the usable volume
    pub fn floor_y(&self) -> i64 {
        self.inner.min.y
    }

    /// Where occupants are placed on entry
    pub fn anchor(&self) -> Location {
        Location::new(
            Realm::Backing,
            self.center.x as f64 + 0.5,
            self.center.y as f64,
            self.center.z as f64 + 0.5,
        )
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_active = now;
        self.active = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DimensionConfig;

    fn instance(index: u32) -> Instance {
        let layout = GridLayout::from_config(&DimensionConfig::default());
        Instance::new(OwnerId::from_u128(1), "alice", index, &layout, Utc::now())
    }

    #[test]
    fn test_zones() {
        let inst = instance(0);
        assert_eq!(inst.zone(inst.center), Zone::Inner);
        assert_eq!(inst.zone(inst.outer.min), Zone::Shell);
        assert_eq!(inst.zone(inst.inner.max.offset(1, 0, 0)), Zone::Shell);
        assert_eq!(inst.zone(inst.outer.max.offset(1, 0, 0)), Zone::Outside);
    }

    #[test]
    fn test_reindex_clears_materialization() {
        let layout = GridLayout::from_config(&DimensionConfig::default());
        let mut inst = instance(0);
        inst.materialized = true;
        inst.content_populated = true;
        inst.state = InstanceState::Materialized;
        inst.reindex(5, &layout);
        assert_eq!(inst.center, layout.cell_for(5).center);
        assert!(!inst.materialized && !inst.content_populated);
        assert_eq!(inst.state, InstanceState::Requested);
    }

    #[test]
    fn test_territory_is_horizontal() {
        let inst = instance(0);
        assert!(inst.in_territory(BlockPos::new(400, 0, -400), 400));
        assert!(!inst.in_territory(BlockPos::new(401, 128, 0), 400));
    }
}
