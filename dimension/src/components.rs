//! Shared value types: identities, blocks, biomes and occupant locations
//!
//! The occupant types double as `hecs` components in the sandbox engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identity
// ============================================================================

/// Owner of a pocket space (one space per owner)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(pub Uuid);

impl OwnerId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_u128(v: u128) -> Self {
        Self(Uuid::from_u128(v))
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// Blocks & Biomes
// ============================================================================

/// Block kinds the dimension reads or writes. Anything else the engine
/// stores is carried through as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Block {
    #[default]
    Air,
    /// Unbreakable shell material
    Anchor,
    Floor,
    FloorAccent,
    FloorLight,
    Light,
    LightRod,
    Other(u32),
}

impl Block {
    pub fn is_air(self) -> bool {
        self == Block::Air
    }

    pub fn is_anchor(self) -> bool {
        self == Block::Anchor
    }

    /// Blocks laid by the floor pattern
    pub fn is_floor(self) -> bool {
        matches!(self, Block::Floor | Block::FloorAccent | Block::FloorLight)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BiomeId(pub u8);

impl BiomeId {
    /// The single biome tag of the backing world
    pub const VOID: BiomeId = BiomeId(127);
}

// ============================================================================
// Occupants
// ============================================================================

/// Which world an occupant stands in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Realm {
    /// The shared world pocket spaces are carved from
    Backing,
    /// Any other world, by engine id
    Home(i32),
}

/// Precise occupant location
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub realm: Realm,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Location {
    pub fn new(realm: Realm, x: f64, y: f64, z: f64) -> Self {
        Self { realm, x, y, z }
    }

    /// Same realm and within half a block
    pub fn same_place(&self, other: &Location) -> bool {
        if self.realm != other.realm {
            return false;
        }
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        dx * dx + dy * dy + dz * dz < 0.25
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Velocity {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Velocity {
    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }
}
