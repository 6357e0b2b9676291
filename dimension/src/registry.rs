//! Instance Registry
//!
//! Authoritative owner → instance map plus two derived indices:
//! - chunk column → owner (ownership index, used by the boundary guard)
//! - slot index → owner (used to keep slots unique)
//!
//! Everything is a `DashMap`, so readers on other threads never see a torn
//! map. Readers get clones; nothing hands out references into the maps.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::allocator::GridLayout;
use crate::components::OwnerId;
use crate::error::{DimensionError, Result};
use crate::geometry::{BlockPos, ChunkPos};
use crate::instance::Instance;

pub struct Registry {
    layout: GridLayout,
    instances: DashMap<OwnerId, Instance>,
    owners_by_cell: DashMap<ChunkPos, OwnerId>,
    owners_by_slot: DashMap<u32, OwnerId>,
    next_index: AtomicU32,
}

impl Registry {
    pub fn new(layout: GridLayout) -> Self {
        Self {
            layout,
            instances: DashMap::new(),
            owners_by_cell: DashMap::new(),
            owners_by_slot: DashMap::new(),
            next_index: AtomicU32::new(0),
        }
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn contains(&self, owner: &OwnerId) -> bool {
        self.instances.contains_key(owner)
    }

    pub fn get(&self, owner: &OwnerId) -> Option<Instance> {
        self.instances.get(owner).map(|entry| entry.value().clone())
    }

    /// Next slot that will be handed out
    pub fn next_index(&self) -> u32 {
        self.next_index.load(Ordering::SeqCst)
    }

    pub fn set_next_index(&self, next: u32) {
        self.next_index.store(next, Ordering::SeqCst);
    }

    /// Return the owner's instance, creating it in the next free slot if
    /// needed. The bool is true when a new record was inserted.
    pub fn get_or_insert(
        &self,
        owner: OwnerId,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> (Instance, bool) {
        match self.instances.entry(owner) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let index = self.allocate_index(owner);
                let instance = Instance::new(owner, display_name, index, &self.layout, now);
                // Indices first: the guard must see the space as soon as the
                // record is visible.
                self.index_cells(&instance);
                entry.insert(instance.clone());
                (instance, true)
            }
        }
    }

    /// Insert a record read back from a snapshot, keeping its slot.
    pub fn insert_restored(&self, instance: Instance) -> Result<()> {
        match self.owners_by_slot.entry(instance.index) {
            Entry::Occupied(slot) if *slot.get() != instance.owner => {
                return Err(DimensionError::AllocationConflict {
                    index: instance.index,
                    holder: *slot.get(),
                    claimant: instance.owner,
                });
            }
            Entry::Occupied(_) => {}
            Entry::Vacant(slot) => {
                slot.insert(instance.owner);
            }
        }
        if let Some(previous) = self.instances.get(&instance.owner).map(|e| e.value().clone()) {
            self.unindex_cells(&previous);
        }
        self.index_cells(&instance);
        self.next_index.fetch_max(instance.index.saturating_add(1), Ordering::SeqCst);
        self.instances.insert(instance.owner, instance);
        Ok(())
    }

    /// Claim the lowest unused slot at or after the counter
    pub fn allocate_index(&self, owner: OwnerId) -> u32 {
        loop {
            let index = self.next_index.fetch_add(1, Ordering::SeqCst);
            if let Entry::Vacant(slot) = self.owners_by_slot.entry(index) {
                slot.insert(owner);
                return index;
            }
        }
    }

    /// Mutate a record in place. Derived indices are not touched, so `f`
    /// must not change the slot; use `move_to_slot` for that.
    pub fn update<R>(&self, owner: &OwnerId, f: impl FnOnce(&mut Instance) -> R) -> Option<R> {
        self.instances.get_mut(owner).map(|mut entry| f(entry.value_mut()))
    }

    /// Re-index an instance into a freshly allocated slot
    pub fn move_to_slot(&self, owner: &OwnerId) -> Option<Instance> {
        let current = self.get(owner)?;
        self.unindex_cells(&current);
        self.owners_by_slot.remove_if(&current.index, |_, holder| holder == owner);
        let index = self.allocate_index(*owner);
        let moved = self.update(owner, |inst| {
            inst.reindex(index, &self.layout);
            inst.clone()
        })?;
        self.index_cells(&moved);
        Some(moved)
    }

    pub fn remove(&self, owner: &OwnerId) -> Option<Instance> {
        let (_, instance) = self.instances.remove(owner)?;
        self.unindex_cells(&instance);
        self.owners_by_slot.remove_if(&instance.index, |_, holder| holder == owner);
        Some(instance)
    }

    pub fn clear(&self) {
        self.instances.clear();
        self.owners_by_cell.clear();
        self.owners_by_slot.clear();
        self.next_index.store(0, Ordering::SeqCst);
    }

    /// Owner registered for a chunk column, if any
    pub fn owner_of_cell(&self, cell: ChunkPos) -> Option<OwnerId> {
        self.owners_by_cell.get(&cell).map(|e| *e.value())
    }

    pub fn indexed_cells(&self) -> usize {
        self.owners_by_cell.len()
    }

    /// Instance whose outer bounds contain `pos`.
    ///
    /// Tries the ownership index, then the slot grid, then scans every
    /// record, so a stale or colliding index entry only costs speed.
    pub fn find_by_pos(&self, pos: BlockPos) -> Option<Instance> {
        if let Some(owner) = self.owner_of_cell(pos.chunk()) {
            if let Some(inst) = self.get(&owner).filter(|i| i.outer.contains(pos)) {
                return Some(inst);
            }
        }
        if let Some(index) = self.layout.index_near(pos) {
            let owner = self.owners_by_slot.get(&index).map(|e| *e.value());
            if let Some(inst) = owner.and_then(|o| self.get(&o)).filter(|i| i.outer.contains(pos)) {
                return Some(inst);
            }
        }
        self.instances
            .iter()
            .find(|entry| entry.value().outer.contains(pos))
            .map(|entry| entry.value().clone())
    }

    /// Instance whose territory covers `pos`
    pub fn find_territory_owner(&self, pos: BlockPos, radius: u32) -> Option<Instance> {
        if let Some(inst) = self.find_by_pos(pos) {
            return Some(inst);
        }
        self.instances
            .iter()
            .find(|entry| entry.value().in_territory(pos, radius))
            .map(|entry| entry.value().clone())
    }

    /// Copy of every record, ordered by slot
    pub fn snapshot(&self) -> Vec<Instance> {
        let mut all: Vec<Instance> = self.instances.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|inst| inst.index);
        all
    }

    fn index_cells(&self, instance: &Instance) {
        for cell in GridLayout::cell_keys(&instance.outer) {
            self.owners_by_cell.insert(cell, instance.owner);
        }
    }

    fn unindex_cells(&self, instance: &Instance) {
        for cell in GridLayout::cell_keys(&instance.outer) {
            self.owners_by_cell.remove_if(&cell, |_, owner| *owner == instance.owner);
        }
    }
}
