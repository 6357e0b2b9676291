//! Entry/Exit Coordinator
//!
//! Moves occupants between their home realm and their pocket space. Entry
//! never materializes inline: an unmaterialized space answers
//! `Unavailable(Materializing)` and the caller retries.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::components::{Location, OwnerId, Realm};
use crate::error::{DimensionError, EngineError, Result, UnavailableReason};
use crate::instance::InstanceState;
use crate::scheduler::TaskKind;
use crate::world::PocketDimension;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Travel {
    Moved { from: Location, to: Location },
    /// The occupant already stood at the target
    AlreadyThere,
}

impl PocketDimension {
    /// Send an occupant to their own space, provisioning it if needed
    pub fn enter(&self, owner: OwnerId, display_name: &str, now: DateTime<Utc>) -> Result<Travel> {
        self.ensure_loaded(now)?;
        self.ensure_backing_world()?;
        let instance = self.get_or_create(owner, display_name, now)?;
        self.touch(owner, now);
        self.timers.lock().empty_since = None;

        if !instance.materialized {
            if self.queue.schedule_if_absent(owner, TaskKind::Materialize, now) {
                self.registry.update(&owner, |i| {
                    i.state = InstanceState::Queued(TaskKind::Materialize)
                });
            }
            return Err(DimensionError::Unavailable(UnavailableReason::Materializing));
        }

        let from = self.locate(owner)?;
        let to = instance.anchor();
        if from.same_place(&to) {
            return Ok(Travel::AlreadyThere);
        }
        if from.realm != Realm::Backing {
            self.return_points.insert(owner, from);
        }
        self.host.relocate(owner, to)?;
        info!(owner = %owner, index = instance.index, "entered pocket space");
        Ok(Travel::Moved { from, to })
    }

    /// Send an occupant back where they came from, or to the home spawn
    pub fn exit(&self, owner: OwnerId, now: DateTime<Utc>) -> Result<Travel> {
        let from = self.locate(owner)?;
        if from.realm != Realm::Backing {
            return Ok(Travel::AlreadyThere);
        }

        let to = self
            .return_points
            .get(&owner)
            .map(|entry| *entry.value())
            .unwrap_or_else(|| self.host.home_spawn(owner));
        if from.same_place(&to) {
            return Ok(Travel::AlreadyThere);
        }
        self.host.relocate(owner, to)?;
        self.return_points.remove(&owner);
        self.touch(owner, now);
        info!(owner = %owner, "left pocket space");
        Ok(Travel::Moved { from, to })
    }

    /// Remembered exit target of an occupant
    pub fn return_point(&self, owner: OwnerId) -> Option<Location> {
        self.return_points.get(&owner).map(|entry| *entry.value())
    }

    fn locate(&self, owner: OwnerId) -> Result<Location> {
        self.host
            .locate(owner)
            .ok_or(DimensionError::Engine(EngineError::OccupantMissing(owner)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DimensionConfig;
    use crate::engine::WorldHost;
    use crate::sandbox::SandboxWorld;
    use chrono::Duration;
    use std::sync::Arc;
    use tempfile::TempDir;

    const A: OwnerId = OwnerId::from_u128(0xA);

    fn setup() -> (TempDir, Arc<SandboxWorld>, PocketDimension) {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(SandboxWorld::new(Some(dir.path().to_path_buf())));
        let dim = PocketDimension::new(DimensionConfig::default(), host.clone()).unwrap();
        (dir, host, dim)
    }

    fn home() -> Location {
        Location::new(Realm::Home(0), 120.5, 70.0, -33.5)
    }

    #[test]
    fn test_first_entry_waits_for_materialization() {
        let (_dir, host, dim) = setup();
        host.spawn_occupant(A, home());
        let now = Utc::now();

        let err = dim.enter(A, "alice", now).unwrap_err();
        assert!(matches!(err, DimensionError::Unavailable(UnavailableReason::Materializing)));
        assert_eq!(host.locate(A), Some(home()));
        // Asking again does not stack another task
        assert!(dim.enter(A, "alice", now).is_err());
        assert_eq!(dim.queue().pending(TaskKind::Materialize), 1);

        dim.tick(now + Duration::seconds(3));
        match dim.enter(A, "alice", now + Duration::seconds(3)).unwrap() {
            Travel::Moved { from, to } => {
                assert_eq!(from, home());
                assert_eq!(to, dim.instance(A).unwrap().anchor());
            }
            Travel::AlreadyThere => panic!("occupant did not move"),
        }
        assert_eq!(host.locate(A).unwrap().realm, Realm::Backing);
        assert!(host.velocity(A).unwrap().is_zero());
        assert_eq!(dim.return_point(A), Some(home()));
    }

    #[test]
    fn test_enter_twice_is_already_there() {
        let (_dir, host, dim) = setup();
        host.spawn_occupant(A, home());
        let now = Utc::now();
        let _ = dim.enter(A, "alice", now);
        let t = now + Duration::seconds(3);
        dim.tick(t);
        dim.enter(A, "alice", t).unwrap();
        assert_eq!(dim.enter(A, "alice", t).unwrap(), Travel::AlreadyThere);
        // The original return point survives a re-entry
        assert_eq!(dim.return_point(A), Some(home()));
    }

    #[test]
    fn test_exit_returns_to_prior_location() {
        let (_dir, host, dim) = setup();
        host.spawn_occupant(A, home());
        let now = Utc::now();
        let _ = dim.enter(A, "alice", now);
        let t = now + Duration::seconds(3);
        dim.tick(t);
        dim.enter(A, "alice", t).unwrap();

        assert!(matches!(dim.exit(A, t).unwrap(), Travel::Moved { to, .. } if to == home()));
        assert_eq!(host.locate(A), Some(home()));
        assert!(dim.return_point(A).is_none());
        assert_eq!(dim.exit(A, t).unwrap(), Travel::AlreadyThere);
    }

    #[test]
    fn test_exit_without_return_point_uses_home_spawn() {
        let (_dir, host, dim) = setup();
        let now = Utc::now();
        let inst = dim.get_or_create(A, "alice", now).unwrap();
        dim.tick(now + Duration::seconds(3));
        host.spawn_occupant(A, inst.anchor());

        let Travel::Moved { to, .. } = dim.exit(A, now).unwrap() else {
            panic!("occupant did not move");
        };
        assert_eq!(to, host.home_spawn(A));
    }

    #[test]
    fn test_missing_occupant() {
        let (_dir, _host, dim) = setup();
        let now = Utc::now();
        let _ = dim.enter(A, "alice", now);
        dim.tick(now + Duration::seconds(3));
        assert!(matches!(
            dim.enter(A, "alice", now + Duration::seconds(3)),
            Err(DimensionError::Engine(EngineError::OccupantMissing(_)))
        ));
        assert!(matches!(
            dim.exit(A, now),
            Err(DimensionError::Engine(EngineError::OccupantMissing(_)))
        ));
    }

    #[test]
    fn test_entry_blocked_while_world_unavailable() {
        let (_dir, host, dim) = setup();
        host.set_available(false);
        host.spawn_occupant(A, home());
        let err = dim.enter(A, "alice", Utc::now()).unwrap_err();
        assert!(matches!(err, DimensionError::Unavailable(UnavailableReason::BackingWorldOffline)));
        assert!(dim.instance(A).is_none());
    }
}
