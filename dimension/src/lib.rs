//! Pocket Dimension Engine
//!
//! Per-owner isolated spaces carved out of one shared, empty backing world:
//! deterministic slot allocation, deferred materialization, shell
//! protection and repair, and a compact on-disk registry.

pub mod allocator;
pub mod components;
pub mod config;
pub mod engine;
pub mod error;
pub mod generator;
pub mod geometry;
pub mod guard;
pub mod instance;
pub mod persistence;
pub mod registry;
pub mod sandbox;
pub mod scheduler;
pub mod seeding;
pub mod systems;
pub mod tick_runner;
pub mod travel;
pub mod world;

pub use components::*;
pub use config::DimensionConfig;
pub use engine::{BlockStore, ContentGenerator, DimensionListener, WorldHost};
pub use error::{DimensionError, Result};
pub use geometry::{BlockPos, Bounds, ChunkPos};
pub use guard::{Actor, Mutation, SpawnOrigin, Verdict};
pub use instance::{Instance, InstanceState};
pub use persistence::{LoadReport, SaveStats};
pub use travel::Travel;
pub use world::{BackingState, PocketDimension, TickReport};
