//! Error types for the pocket dimension
//!
//! - **DimensionError**: every failure an operation can surface
//! - **EngineError**: failures reported by the host engine
//! - **SnapshotError**: snapshot encode/decode failures
//! - **Denial**: boundary rejections, with their user-facing message

use std::fmt;
use thiserror::Error;

use crate::components::OwnerId;
use crate::geometry::ChunkPos;

pub type Result<T> = std::result::Result<T, DimensionError>;

/// Why the dimension cannot serve a request right now. Always retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    BackingWorldOffline,
    BackingWorldInitializing,
    /// The space exists but its shell has not been written yet
    Materializing,
    /// No save directory yet, so the registry cannot be loaded
    RegistryNotLoaded,
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::BackingWorldOffline => "backing world is offline",
            Self::BackingWorldInitializing => "backing world is starting",
            Self::Materializing => "space is still being prepared, try again shortly",
            Self::RegistryNotLoaded => "space registry is not loaded yet",
        };
        f.write_str(text)
    }
}

/// A rejected mutation or breach
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// Shell coordinates are never writable
    ShellProtected { owner: OwnerId },
    /// Anchor material cannot be placed by hand
    AnchorPlacement { owner: OwnerId },
    /// Someone else's usable volume
    ForeignSpace { owner: OwnerId },
    /// Only the owner may open their own shell
    ForeignShell { owner: OwnerId },
    /// Breach target is not a shell coordinate
    NotShell,
}

impl Denial {
    /// Advisory text shown to the actor
    pub fn message(&self) -> &'static str {
        match self {
            Self::ShellProtected { .. } => "The anchored wall of this space cannot be broken!",
            Self::AnchorPlacement { .. } => "You cannot place blocks on an anchored wall!",
            Self::ForeignSpace { .. } => "You cannot modify another player's pocket space!",
            Self::ForeignShell { .. } => "Only the owner can open this space's wall!",
            Self::NotShell => "That is not part of a pocket space wall.",
        }
    }

    pub fn owner(&self) -> Option<OwnerId> {
        match self {
            Self::ShellProtected { owner }
            | Self::AnchorPlacement { owner }
            | Self::ForeignSpace { owner }
            | Self::ForeignShell { owner } => Some(*owner),
            Self::NotShell => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("chunk ({}, {}) is not loaded", .0.x, .0.z)]
    ChunkNotLoaded(ChunkPos),

    #[error("backing world is offline")]
    Offline,

    #[error("occupant {0} is not present")]
    OccupantMissing(OwnerId),

    #[error("engine failure: {0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file too small to be a snapshot ({0} bytes)")]
    TooShort(usize),

    #[error("invalid magic bytes")]
    BadMagic,

    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),

    #[error("decompression failed: {0}")]
    Decompress(String),

    #[error("encoding error: {0}")]
    Codec(#[from] bincode::Error),
}

#[derive(Error, Debug)]
pub enum DimensionError {
    #[error("unavailable: {0}")]
    Unavailable(UnavailableReason),

    #[error("denied: {}", .0.message())]
    Denied(Denial),

    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(#[source] SnapshotError),

    #[error("slot {index} is claimed by {holder}, cannot restore {claimant} there")]
    AllocationConflict {
        index: u32,
        holder: OwnerId,
        claimant: OwnerId,
    },

    #[error("no pocket space for {0}")]
    UnknownInstance(OwnerId),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl DimensionError {
    /// Transient failures the caller should simply retry later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
