//! Boundary Guard
//!
//! Decides whether a block mutation inside the backing world may proceed.
//! The guard only reads the registry; any restore it asks for is scheduled
//! by the caller.

use crate::components::{Block, OwnerId};
use crate::error::Denial;
use crate::geometry::BlockPos;
use crate::instance::{Instance, Zone};
use crate::registry::Registry;

/// Who is attempting the mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// Engine-internal changes (fluids, explosions, pistons, generators)
    System,
    Occupant(OwnerId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Break { existing: Block },
    Place { block: Block, existing: Block },
}

impl Mutation {
    /// Block currently at the target
    pub fn existing(&self) -> Block {
        match self {
            Mutation::Break { existing } | Mutation::Place { existing, .. } => *existing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny {
        denial: Denial,
        /// Owner whose shell needs a restore pass
        restore: Option<OwnerId>,
        /// Whether the actor should be told
        notify: bool,
    },
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnOrigin {
    /// Ambient biome spawning
    Natural,
    Spawner,
    Structure,
}

pub struct BoundaryGuard<'a> {
    registry: &'a Registry,
}

impl<'a> BoundaryGuard<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Instance owning `pos` and the zone it falls in; `None` is unclaimed space
    pub fn classify(&self, pos: BlockPos) -> Option<(Instance, Zone)> {
        let instance = self.registry.find_by_pos(pos)?;
        let zone = instance.zone(pos);
        Some((instance, zone))
    }

    pub fn check(&self, actor: Actor, pos: BlockPos, mutation: Mutation) -> Verdict {
        let Some((instance, zone)) = self.classify(pos) else {
            return Verdict::Allow;
        };
        let owner = instance.owner;
        let notify = matches!(actor, Actor::Occupant(_));

        match zone {
            Zone::Shell => {
                let denial = match (actor, mutation) {
                    (Actor::Occupant(_), Mutation::Place { block: Block::Anchor, .. }) => {
                        Denial::AnchorPlacement { owner }
                    }
                    _ => Denial::ShellProtected { owner },
                };
                // Removing anchor material, or touching a coordinate that has
                // already lost it, both leave the shell in need of repair.
                let damaged = match mutation {
                    Mutation::Break { .. } => true,
                    Mutation::Place { existing, .. } => !existing.is_anchor(),
                };
                Verdict::Deny {
                    denial,
                    restore: damaged.then_some(owner),
                    notify,
                }
            }
            Zone::Inner => match actor {
                Actor::System => Verdict::Allow,
                Actor::Occupant(who) if who == owner => Verdict::Allow,
                Actor::Occupant(_) => Verdict::Deny {
                    denial: Denial::ForeignSpace { owner },
                    restore: None,
                    notify,
                },
            },
            Zone::Outside => Verdict::Allow,
        }
    }

    /// Validate an owner opening their own shell at `pos`
    pub fn check_breach(&self, owner: OwnerId, pos: BlockPos) -> Result<Instance, Denial> {
        match self.classify(pos) {
            Some((instance, Zone::Shell)) if instance.owner == owner => Ok(instance),
            Some((instance, Zone::Shell)) => Err(Denial::ForeignShell { owner: instance.owner }),
            _ => Err(Denial::NotShell),
        }
    }

    /// Natural spawns never happen in the backing world; spawner and
    /// structure spawns only inside someone's territory.
    pub fn allows_spawn(&self, pos: BlockPos, origin: SpawnOrigin, territory_radius: u32) -> bool {
        match origin {
            SpawnOrigin::Natural => false,
            SpawnOrigin::Spawner | SpawnOrigin::Structure => self
                .registry
                .find_territory_owner(pos, territory_radius)
                .is_some(),
        }
    }
}
