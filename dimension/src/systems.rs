//! Dimension systems - the work `PocketDimension::tick` dispatches
//!
//! Each system is a free function over the engine interfaces and plain
//! records; scheduling and bookkeeping stay in the orchestrator.

pub mod maintenance;
pub mod materialize;
pub mod restore;

pub use maintenance::{sweep_inactive, CooldownMap};
pub use materialize::{materialize_system, detect_existing_shell, MaterializeOutcome};
pub use restore::restore_system;
