//! Pocket Dimension - main orchestrator
//!
//! Owns the registry, the deferred task queue and the backing world
//! lifecycle. Every operation takes `&self` and an explicit `now`, so one
//! instance can be shared between the simulation thread and readers.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::allocator::GridLayout;
use crate::components::{Block, Location, OwnerId};
use crate::config::DimensionConfig;
use crate::engine::{ContentGenerator, DimensionListener, NoContent, WorldHost};
use crate::error::{DimensionError, Result, UnavailableReason};
use crate::geometry::BlockPos;
use crate::guard::{Actor, BoundaryGuard, Mutation, SpawnOrigin, Verdict};
use crate::instance::{Instance, InstanceState, Zone};
use crate::persistence::{LoadReport, SaveStats};
use crate::registry::Registry;
use crate::scheduler::{TaskKind, TaskQueue};
use crate::systems::{self, CooldownMap, MaterializeOutcome};

/// Lifecycle of the shared backing world
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingState {
    Uninitialized,
    Initializing,
    Ready,
}

/// What one `tick` did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub materialized: Option<OwnerId>,
    pub restored: Option<OwnerId>,
    /// Due work was held back because the backing world is not ready
    pub deferred: bool,
    pub saved: bool,
    pub deactivated: usize,
    pub unloaded: bool,
    pub pending_materialize: usize,
    pub pending_restore: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Timers {
    pub last_save: Option<DateTime<Utc>>,
    pub last_cleanup: Option<DateTime<Utc>>,
    /// Since when the backing world has had no occupants
    pub empty_since: Option<DateTime<Utc>>,
}

pub struct PocketDimension {
    pub(crate) config: DimensionConfig,
    pub(crate) registry: Registry,
    pub(crate) queue: TaskQueue,
    pub(crate) host: Arc<dyn WorldHost>,
    content: Arc<dyn ContentGenerator>,
    listeners: RwLock<Vec<Arc<dyn DimensionListener>>>,
    pub(crate) loaded: OnceCell<LoadReport>,
    backing: Mutex<BackingState>,
    cooldowns: CooldownMap,
    pub(crate) return_points: DashMap<OwnerId, Location>,
    pub(crate) timers: Mutex<Timers>,
    pub(crate) save_lock: Mutex<()>,
}

impl PocketDimension {
    pub fn new(config: DimensionConfig, host: Arc<dyn WorldHost>) -> Result<Self> {
        config.validate()?;
        let layout = GridLayout::from_config(&config);
        let cooldowns = CooldownMap::new(config.notice_cooldown(), config.notice_capacity);
        Ok(Self {
            registry: Registry::new(layout),
            queue: TaskQueue::new(),
            host,
            content: Arc::new(NoContent),
            listeners: RwLock::new(Vec::new()),
            loaded: OnceCell::new(),
            backing: Mutex::new(BackingState::Uninitialized),
            cooldowns,
            return_points: DashMap::new(),
            timers: Mutex::new(Timers::default()),
            save_lock: Mutex::new(()),
            config,
        })
    }

    /// Use `content` to fill freshly materialized spaces
    pub fn with_content(mut self, content: Arc<dyn ContentGenerator>) -> Self {
        self.content = content;
        self
    }

    /// Listeners are invoked in registration order
    pub fn add_listener(&self, listener: Arc<dyn DimensionListener>) {
        self.listeners.write().push(listener);
    }

    pub fn config(&self) -> &DimensionConfig {
        &self.config
    }

    pub fn layout(&self) -> &GridLayout {
        self.registry.layout()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    // ========================================================================
    // Backing World
    // ========================================================================

    pub fn backing_state(&self) -> BackingState {
        *self.backing.lock()
    }

    /// Bring the backing world online if it is not.
    ///
    /// The state check and the move to `Initializing` happen under one lock,
    /// so concurrent callers never start a second initialization.
    pub fn ensure_backing_world(&self) -> Result<()> {
        {
            let mut state = self.backing.lock();
            match *state {
                BackingState::Ready => return Ok(()),
                BackingState::Initializing => {
                    return Err(DimensionError::Unavailable(
                        UnavailableReason::BackingWorldInitializing,
                    ))
                }
                BackingState::Uninitialized => *state = BackingState::Initializing,
            }
        }

        let outcome = self.host.bring_online();
        let mut state = self.backing.lock();
        match outcome {
            Ok(true) => {
                *state = BackingState::Ready;
                info!("backing world online");
                Ok(())
            }
            Ok(false) => {
                *state = BackingState::Uninitialized;
                debug!("backing world not available yet");
                Err(DimensionError::Unavailable(UnavailableReason::BackingWorldOffline))
            }
            Err(e) => {
                *state = BackingState::Uninitialized;
                warn!("failed to bring backing world online: {}", e);
                Err(DimensionError::Unavailable(UnavailableReason::BackingWorldOffline))
            }
        }
    }

    /// Take the backing world offline, saving the registry
    pub fn unload_backing_world(&self, now: DateTime<Utc>) -> Result<()> {
        self.host.take_offline()?;
        self.on_backing_world_unload(now);
        Ok(())
    }

    /// The host unloaded the backing world (or we did)
    pub fn on_backing_world_unload(&self, now: DateTime<Utc>) {
        if self.is_loaded() {
            self.persist(now);
        }
        *self.backing.lock() = BackingState::Uninitialized;
        self.timers.lock().empty_since = None;
        info!("backing world unloaded");
    }

    // ========================================================================
    // Instances
    // ========================================================================

    /// Return the owner's instance, creating and queueing it on first request
    pub fn get_or_create(
        &self,
        owner: OwnerId,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Instance> {
        self.ensure_loaded(now)?;
        let (instance, created) = self.registry.get_or_insert(owner, display_name, now);
        if !created {
            let due = now + self.config.materialize_delay();
            if !instance.materialized && self.queue.schedule_if_absent(owner, TaskKind::Materialize, due) {
                debug!(owner = %owner, "re-queued unmaterialized pocket space");
                return Ok(self
                    .registry
                    .update(&owner, |i| {
                        i.state = InstanceState::Queued(TaskKind::Materialize);
                        i.clone()
                    })
                    .unwrap_or(instance));
            }
            return Ok(instance);
        }

        let due = now + self.config.materialize_delay();
        self.queue.schedule(owner, TaskKind::Materialize, due);
        let instance = self
            .registry
            .update(&owner, |i| {
                i.state = InstanceState::Queued(TaskKind::Materialize);
                i.clone()
            })
            .unwrap_or(instance);
        info!(
            owner = %owner,
            index = instance.index,
            x = instance.center.x,
            z = instance.center.z,
            "created pocket space"
        );
        self.persist(now);
        Ok(instance)
    }

    pub fn instance(&self, owner: OwnerId) -> Option<Instance> {
        self.registry.get(&owner)
    }

    pub fn state_of(&self, owner: OwnerId) -> Option<InstanceState> {
        self.registry.get(&owner).map(|i| i.state)
    }

    /// Copy of every instance, ordered by slot
    pub fn instances(&self) -> Vec<Instance> {
        self.registry.snapshot()
    }

    /// Instance whose outer bounds contain `pos`
    pub fn instance_at(&self, pos: BlockPos) -> Option<Instance> {
        self.registry.find_by_pos(pos)
    }

    /// Record activity for an owner
    pub fn touch(&self, owner: OwnerId, now: DateTime<Utc>) {
        self.registry.update(&owner, |i| i.touch(now));
    }

    /// Queue a shell repair. An outstanding repair keeps its earlier due
    /// time, so repeated attempts at a hole cannot hold it open.
    pub fn schedule_restore(
        &self,
        owner: OwnerId,
        delay: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let materialized = self
            .registry
            .update(&owner, |i| {
                if i.materialized {
                    i.state = InstanceState::Queued(TaskKind::RestoreShell);
                }
                i.materialized
            })
            .ok_or(DimensionError::UnknownInstance(owner))?;
        if materialized {
            self.queue
                .schedule_earliest(owner, TaskKind::RestoreShell, now + delay);
        }
        Ok(())
    }

    /// Administrative removal of one owner's record
    pub fn remove(&self, owner: OwnerId, now: DateTime<Utc>) -> Result<Instance> {
        self.ensure_loaded(now)?;
        let removed = self
            .registry
            .remove(&owner)
            .ok_or(DimensionError::UnknownInstance(owner))?;
        self.queue.cancel_owner(owner);
        self.return_points.remove(&owner);
        warn!(owner = %owner, index = removed.index, "pocket space removed");
        self.persist(now);
        Ok(removed)
    }

    /// Administrative reset: forget every instance
    pub fn reset(&self, now: DateTime<Utc>) -> Result<SaveStats> {
        self.ensure_loaded(now)?;
        let count = self.registry.len();
        self.registry.clear();
        self.queue.clear();
        self.return_points.clear();
        self.cooldowns.clear();
        warn!(count, "all pocket spaces reset");
        self.save(now)
    }

    // ========================================================================
    // Boundary
    // ========================================================================

    /// Decide a block mutation in the backing world.
    ///
    /// Shell damage queues a repair; user-facing notices are rate limited
    /// per actor.
    pub fn check_mutation(
        &self,
        actor: Actor,
        pos: BlockPos,
        mutation: Mutation,
        now: DateTime<Utc>,
    ) -> Verdict {
        if let Err(e) = self.ensure_loaded(now) {
            debug!("mutation check before registry load: {}", e);
        }
        let verdict = BoundaryGuard::new(&self.registry).check(actor, pos, mutation);
        let Verdict::Deny { denial, restore, notify } = verdict else {
            return verdict;
        };

        if let Some(owner) = restore {
            if let Err(e) = self.schedule_restore(owner, self.config.restore_delay(), now) {
                warn!("could not queue shell repair: {}", e);
            }
        }
        let notify = match actor {
            Actor::Occupant(who) if notify => self.cooldowns.try_notify(who, now),
            _ => false,
        };
        debug!(?actor, x = pos.x, y = pos.y, z = pos.z, ?denial, "mutation denied");
        Verdict::Deny { denial, restore, notify }
    }

    /// The owner deliberately opens their own shell at `pos`
    pub fn open_breach(&self, owner: OwnerId, pos: BlockPos, now: DateTime<Utc>) -> Result<Instance> {
        self.ensure_loaded(now)?;
        let instance = BoundaryGuard::new(&self.registry)
            .check_breach(owner, pos)
            .map_err(DimensionError::Denied)?;
        if !instance.materialized {
            return Err(DimensionError::Unavailable(UnavailableReason::Materializing));
        }
        self.ensure_backing_world()?;

        let blocks = self.host.blocks();
        if !blocks.is_chunk_loaded(pos.chunk()) {
            blocks.load_chunk(pos.chunk())?;
        }
        blocks.set_block(pos, Block::Air)?;

        info!(owner = %owner, x = pos.x, y = pos.y, z = pos.z, "shell opened");
        self.mark_breached(owner, now)
            .ok_or(DimensionError::UnknownInstance(owner))
    }

    /// The engine reports that a shell coordinate lost its anchor
    pub fn notify_shell_damage(&self, pos: BlockPos, now: DateTime<Utc>) -> Option<OwnerId> {
        let (instance, zone) = BoundaryGuard::new(&self.registry).classify(pos)?;
        if zone != Zone::Shell || !instance.materialized {
            return None;
        }
        self.mark_breached(instance.owner, now).map(|i| i.owner)
    }

    /// Spawn policy of the backing world
    pub fn check_spawn(&self, pos: BlockPos, origin: SpawnOrigin) -> bool {
        BoundaryGuard::new(&self.registry).allows_spawn(pos, origin, self.config.territory_radius)
    }

    fn mark_breached(&self, owner: OwnerId, now: DateTime<Utc>) -> Option<Instance> {
        let (instance, newly) = self.registry.update(&owner, |i| {
            let newly = !i.shell_breached;
            i.shell_breached = true;
            i.state = InstanceState::ShellBreached;
            (i.clone(), newly)
        })?;
        if newly {
            self.notify_listeners(|l| l.on_shell_breached(&instance));
            self.persist(now);
        }
        self.queue
            .schedule_earliest(owner, TaskKind::RestoreShell, now + self.config.restore_delay());
        self.registry
            .update(&owner, |i| {
                i.state = InstanceState::Queued(TaskKind::RestoreShell);
                i.clone()
            })
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Run one scheduling cycle: at most one materialization and one shell
    /// repair, then the periodic duties.
    pub fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        if let Err(e) = self.ensure_loaded(now) {
            debug!("tick before registry load: {}", e);
            return report;
        }

        let has_due = self.queue.peek_due(TaskKind::Materialize, now).is_some()
            || self.queue.peek_due(TaskKind::RestoreShell, now).is_some();
        if has_due && self.backing_state() != BackingState::Ready {
            let _ = self.ensure_backing_world();
        }

        if self.backing_state() == BackingState::Ready {
            if let Some(task) = self.queue.pop_due(TaskKind::Materialize, now) {
                report.materialized = self.run_materialize(task.owner, now);
            }
            if let Some(task) = self.queue.pop_due(TaskKind::RestoreShell, now) {
                report.restored = self.run_restore(task.owner, now);
            }
        } else if has_due {
            report.deferred = true;
        }

        let (save_due, cleanup_due) = {
            let mut timers = self.timers.lock();
            let save_due = Self::interval_elapsed(&mut timers.last_save, self.config.save_interval(), now);
            let cleanup_due =
                Self::interval_elapsed(&mut timers.last_cleanup, self.config.cleanup_interval(), now);
            (save_due, cleanup_due)
        };
        if cleanup_due {
            report.deactivated = systems::sweep_inactive(
                &self.registry,
                self.host.as_ref(),
                self.config.inactive_threshold(),
                now,
            );
            if report.deactivated > 0 {
                info!(count = report.deactivated, "marked idle pocket spaces inactive");
            }
        }
        // Deactivations are written right away, not at the next interval
        if save_due || report.deactivated > 0 {
            match self.save(now) {
                Ok(_) => report.saved = true,
                Err(e) => warn!("periodic save failed: {}", e),
            }
        }
        self.cooldowns.evict_expired(now);

        report.unloaded = self.maybe_unload(now);
        report.pending_materialize = self.queue.pending(TaskKind::Materialize);
        report.pending_restore = self.queue.pending(TaskKind::RestoreShell);
        report
    }

    /// Save and stop. Call once when the host shuts down.
    pub fn shutdown(&self, now: DateTime<Utc>) -> Result<SaveStats> {
        let stats = self.save(now)?;
        info!(instances = stats.instances, "pocket dimension shut down");
        Ok(stats)
    }

    /// Starts the interval on first sight; resets it when it fires
    fn interval_elapsed(
        last: &mut Option<DateTime<Utc>>,
        interval: chrono::Duration,
        now: DateTime<Utc>,
    ) -> bool {
        match *last {
            None => {
                *last = Some(now);
                false
            }
            Some(at) if now - at >= interval => {
                *last = Some(now);
                true
            }
            Some(_) => false,
        }
    }

    fn run_materialize(&self, owner: OwnerId, now: DateTime<Utc>) -> Option<OwnerId> {
        let instance = self.registry.get(&owner)?;
        if instance.materialized {
            return None;
        }

        match systems::materialize_system(self.host.blocks(), &instance) {
            Ok(MaterializeOutcome::Written(blocks)) => {
                info!(owner = %owner, index = instance.index, blocks, "materialized pocket space");
            }
            Ok(MaterializeOutcome::AlreadyPresent) => {
                info!(owner = %owner, index = instance.index, "pocket space already present");
            }
            Err(e) => {
                warn!(owner = %owner, "materialization failed, retrying: {}", e);
                let due = now + self.config.retry_delay();
                self.queue.schedule(owner, TaskKind::Materialize, due);
                return None;
            }
        }

        let instance = self.registry.update(&owner, |i| {
            i.materialized = true;
            i.state = InstanceState::Materialized;
            i.clone()
        })?;
        self.notify_listeners(|l| l.on_instance_materialized(&instance));

        if !instance.content_populated {
            let radius = self.config.territory_radius;
            if let Err(e) = self.content.populate(self.host.blocks(), owner, instance.center, radius) {
                warn!(owner = %owner, "content generation failed: {}", e);
            }
            self.registry.update(&owner, |i| i.content_populated = true);
        }

        self.persist(now);
        Some(owner)
    }

    fn run_restore(&self, owner: OwnerId, now: DateTime<Utc>) -> Option<OwnerId> {
        let instance = self.registry.get(&owner)?;
        if !instance.materialized {
            return None;
        }

        match systems::restore_system(self.host.blocks(), &instance) {
            Ok(repaired) => debug!(owner = %owner, repaired, "shell restored"),
            Err(e) => {
                warn!(owner = %owner, "shell restore failed, retrying: {}", e);
                let due = now + self.config.retry_delay();
                self.queue.schedule(owner, TaskKind::RestoreShell, due);
                return None;
            }
        }

        let was_breached = instance.shell_breached;
        let instance = self.registry.update(&owner, |i| {
            i.shell_breached = false;
            i.state = InstanceState::Materialized;
            i.clone()
        })?;
        // Repairs queued by a refused break have no breach to close
        if was_breached {
            self.notify_listeners(|l| l.on_shell_restored(&instance));
            self.persist(now);
        }
        Some(owner)
    }

    fn maybe_unload(&self, now: DateTime<Utc>) -> bool {
        if self.backing_state() != BackingState::Ready {
            return false;
        }
        let busy = self.host.occupants_in_backing_world() > 0 || !self.queue.is_empty();
        let since = {
            let mut timers = self.timers.lock();
            if busy {
                timers.empty_since = None;
                return false;
            }
            *timers.empty_since.get_or_insert(now)
        };
        if now - since < self.config.unload_delay() {
            return false;
        }
        match self.unload_backing_world(now) {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to unload backing world: {}", e);
                false
            }
        }
    }

    fn notify_listeners(&self, f: impl Fn(&dyn DimensionListener)) {
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            f(listener.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::Realm;
    use crate::engine::BlockStore;
    use crate::error::{Denial, EngineError};
    use crate::sandbox::SandboxWorld;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const A: OwnerId = OwnerId::from_u128(0xA);
    const B: OwnerId = OwnerId::from_u128(0xB);

    fn setup() -> (TempDir, Arc<SandboxWorld>, PocketDimension) {
        setup_with(DimensionConfig::default())
    }

    fn setup_with(config: DimensionConfig) -> (TempDir, Arc<SandboxWorld>, PocketDimension) {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(SandboxWorld::new(Some(dir.path().to_path_buf())));
        let dim = PocketDimension::new(config, host.clone()).unwrap();
        (dir, host, dim)
    }

    /// Tick until nothing is due at `now`
    fn drain(dim: &PocketDimension, now: DateTime<Utc>) {
        for _ in 0..64 {
            let report = dim.tick(now);
            if report.materialized.is_none() && report.restored.is_none() {
                return;
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        materialized: AtomicUsize,
        breached: AtomicUsize,
        restored: AtomicUsize,
    }

    impl DimensionListener for Recorder {
        fn on_instance_materialized(&self, _: &Instance) {
            self.materialized.fetch_add(1, Ordering::SeqCst);
        }
        fn on_shell_breached(&self, _: &Instance) {
            self.breached.fetch_add(1, Ordering::SeqCst);
        }
        fn on_shell_restored(&self, _: &Instance) {
            self.restored.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct CountingContent(AtomicUsize);

    impl ContentGenerator for CountingContent {
        fn populate(&self, _: &dyn BlockStore, _: OwnerId, _: BlockPos, _: u32) -> std::result::Result<(), EngineError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::Other("no loot today".into()))
        }
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let (_dir, _host, dim) = setup();
        let now = Utc::now();
        let first = dim.get_or_create(A, "alice", now).unwrap();
        let second = dim.get_or_create(A, "alice", now + Duration::seconds(1)).unwrap();
        assert_eq!(first, second);
        assert_eq!(dim.instances().len(), 1);
        assert_eq!(dim.queue().pending(TaskKind::Materialize), 1);
        assert_eq!(dim.queue().due_at(A, TaskKind::Materialize), Some(now + Duration::seconds(3)));
        assert_eq!(first.state, InstanceState::Queued(TaskKind::Materialize));
    }

    #[test]
    fn test_materialize_waits_for_delay() {
        let (_dir, _host, dim) = setup();
        let now = Utc::now();
        dim.get_or_create(A, "alice", now).unwrap();
        let early = dim.tick(now + Duration::seconds(1));
        assert!(early.materialized.is_none());
        assert_eq!(early.pending_materialize, 1);
        let report = dim.tick(now + Duration::seconds(3));
        assert_eq!(report.materialized, Some(A));
        let inst = dim.instance(A).unwrap();
        assert!(inst.materialized && inst.content_populated);
        assert_eq!(inst.state, InstanceState::Materialized);
        assert_eq!(dim.backing_state(), BackingState::Ready);
    }

    #[test]
    fn test_one_materialization_per_tick() {
        let (_dir, _host, dim) = setup();
        let now = Utc::now();
        for i in 0..5u128 {
            dim.get_or_create(OwnerId::from_u128(100 + i), "p", now).unwrap();
        }
        let due = now + Duration::seconds(3);
        for tick in 0..5 {
            let report = dim.tick(due);
            assert!(report.materialized.is_some(), "tick {tick} did nothing");
            assert_eq!(report.pending_materialize, 4 - tick);
        }
        assert!(dim.tick(due).materialized.is_none());
        assert!(dim.instances().iter().all(|i| i.materialized));
    }

    #[test]
    fn test_due_task_waits_for_backing_world() {
        let (_dir, host, dim) = setup();
        host.set_available(false);
        let now = Utc::now();
        dim.get_or_create(A, "alice", now).unwrap();

        let due = now + Duration::seconds(3);
        let report = dim.tick(due);
        assert!(report.deferred);
        assert!(report.materialized.is_none());
        assert!(dim.queue().is_pending(A, TaskKind::Materialize));
        assert_eq!(dim.backing_state(), BackingState::Uninitialized);

        host.set_available(true);
        assert_eq!(dim.tick(due).materialized, Some(A));
    }

    #[test]
    fn test_engine_failure_is_retried() {
        let (_dir, host, dim) = setup();
        let now = Utc::now();
        dim.get_or_create(A, "alice", now).unwrap();
        dim.ensure_backing_world().unwrap();
        host.set_fail_writes(true);

        let due = now + Duration::seconds(3);
        assert!(dim.tick(due).materialized.is_none());
        assert_eq!(
            dim.queue().due_at(A, TaskKind::Materialize),
            Some(due + Duration::seconds(1))
        );
        assert!(!dim.instance(A).unwrap().materialized);

        host.set_fail_writes(false);
        assert_eq!(dim.tick(due + Duration::seconds(1)).materialized, Some(A));
    }

    #[test]
    fn test_listeners_and_content_run_once() {
        let (_dir, _host, dim) = setup();
        let content = Arc::new(CountingContent::default());
        let dim = dim.with_content(content.clone());
        let recorder = Arc::new(Recorder::default());
        dim.add_listener(recorder.clone());

        let now = Utc::now();
        dim.get_or_create(A, "alice", now).unwrap();
        drain(&dim, now + Duration::seconds(3));
        assert_eq!(recorder.materialized.load(Ordering::SeqCst), 1);
        // A failing generator still latches
        assert_eq!(content.0.load(Ordering::SeqCst), 1);
        assert!(dim.instance(A).unwrap().content_populated);
    }

    #[test]
    fn test_two_owner_scenario() {
        let (_dir, host, dim) = setup();
        let recorder = Arc::new(Recorder::default());
        dim.add_listener(recorder.clone());
        let now = Utc::now();

        let a = dim.get_or_create(A, "alice", now).unwrap();
        let b = dim.get_or_create(B, "bob", now).unwrap();
        assert_eq!(a.center, BlockPos::new(0, 128, 0));
        assert_eq!(b.center, BlockPos::new(dim.layout().spacing(), 128, 0));
        let t = now + Duration::seconds(3);
        drain(&dim, t);
        assert!(a.outer.positions_outside(&a.inner).iter().all(|p| host.block(*p).is_anchor()));

        // A cannot open B's wall
        let b_wall = b.inner.min.offset(-1, 1, 5);
        assert!(matches!(
            dim.open_breach(A, b_wall, t),
            Err(DimensionError::Denied(Denial::ForeignShell { owner: B }))
        ));
        assert!(host.block(b_wall).is_anchor());

        // A opens their own wall; it closes again after the grace delay
        let door = a.inner.min.offset(-1, 1, 5);
        let breached = dim.open_breach(A, door, t).unwrap();
        assert!(breached.shell_breached);
        assert_eq!(breached.state, InstanceState::Queued(TaskKind::RestoreShell));
        assert_eq!(host.block(door), Block::Air);
        assert_eq!(recorder.breached.load(Ordering::SeqCst), 1);

        assert!(dim.tick(t + Duration::seconds(1)).restored.is_none());
        assert_eq!(host.block(door), Block::Air);

        let report = dim.tick(t + Duration::seconds(3));
        assert_eq!(report.restored, Some(A));
        assert!(host.block(door).is_anchor());
        let restored = dim.instance(A).unwrap();
        assert!(!restored.shell_breached);
        assert_eq!(restored.state, InstanceState::Materialized);
        assert_eq!(recorder.restored.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_breach_before_materialization() {
        let (_dir, _host, dim) = setup();
        let now = Utc::now();
        let a = dim.get_or_create(A, "alice", now).unwrap();
        let err = dim.open_breach(A, a.outer.min, now).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_shell_damage_queues_repair() {
        let (_dir, host, dim) = setup();
        let now = Utc::now();
        let a = dim.get_or_create(A, "alice", now).unwrap();
        let t = now + Duration::seconds(3);
        drain(&dim, t);

        let pos = a.outer.max;
        let verdict = dim.check_mutation(Actor::Occupant(B), pos, Mutation::Break { existing: Block::Anchor }, t);
        assert!(matches!(verdict, Verdict::Deny { notify: true, restore: Some(A), .. }));
        assert!(dim.queue().is_pending(A, TaskKind::RestoreShell));

        // The engine lets an explosion through anyway
        host.set_block(pos, Block::Air).unwrap();
        assert_eq!(dim.notify_shell_damage(pos, t), Some(A));
        assert_eq!(dim.notify_shell_damage(a.center, t), None);
        assert_eq!(dim.tick(t + Duration::seconds(3)).restored, Some(A));
        assert!(host.block(pos).is_anchor());
    }

    #[test]
    fn test_denial_notices_are_rate_limited() {
        let (_dir, _host, dim) = setup();
        let now = Utc::now();
        let b = dim.get_or_create(B, "bob", now).unwrap();
        let brk = Mutation::Break { existing: Block::Floor };
        let first = dim.check_mutation(Actor::Occupant(A), b.center, brk, now);
        let second = dim.check_mutation(Actor::Occupant(A), b.center, brk, now + Duration::milliseconds(200));
        let third = dim.check_mutation(Actor::Occupant(A), b.center, brk, now + Duration::seconds(2));
        assert!(matches!(first, Verdict::Deny { notify: true, .. }));
        assert!(matches!(second, Verdict::Deny { notify: false, .. }));
        assert!(matches!(third, Verdict::Deny { notify: true, .. }));
        assert!(dim.check_mutation(Actor::Occupant(B), b.center, brk, now).is_allowed());
    }

    #[test]
    fn test_spawn_policy() {
        let (_dir, _host, dim) = setup();
        let now = Utc::now();
        let a = dim.get_or_create(A, "alice", now).unwrap();
        assert!(!dim.check_spawn(a.center, SpawnOrigin::Natural));
        assert!(dim.check_spawn(a.center.offset(120, 0, 0), SpawnOrigin::Structure));
        assert!(!dim.check_spawn(BlockPos::new(-3000, 100, 0), SpawnOrigin::Spawner));
    }

    #[test]
    fn test_registry_waits_for_save_dir() {
        let host = Arc::new(SandboxWorld::new(None));
        let dim = PocketDimension::new(DimensionConfig::default(), host.clone()).unwrap();
        let err = dim.get_or_create(A, "alice", Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            DimensionError::Unavailable(UnavailableReason::RegistryNotLoaded)
        ));
        assert!(!dim.is_loaded());

        let dir = tempfile::tempdir().unwrap();
        host.set_save_dir(Some(dir.path().to_path_buf()));
        assert!(dim.get_or_create(A, "alice", Utc::now()).is_ok());
        assert!(dim.is_loaded());
    }

    #[test]
    fn test_reload_restores_registry() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let t = now + Duration::seconds(3);
        let before = {
            let host = Arc::new(SandboxWorld::new(Some(dir.path().to_path_buf())));
            let dim = PocketDimension::new(DimensionConfig::default(), host).unwrap();
            dim.get_or_create(A, "alice", now).unwrap();
            dim.get_or_create(B, "bob", now).unwrap();
            drain(&dim, t);
            dim.shutdown(t).unwrap();
            dim.instances()
        };

        let host = Arc::new(SandboxWorld::new(Some(dir.path().to_path_buf())));
        let dim = PocketDimension::new(DimensionConfig::default(), host).unwrap();
        let report = dim.ensure_loaded(t).unwrap().clone();
        assert_eq!(report.restored, 2);
        assert_eq!(report.from_version, Some(2));
        assert_eq!(dim.instances(), before);
        let (c, created) = dim.registry().get_or_insert(OwnerId::from_u128(0xC), "carol", t);
        assert!(created);
        assert_eq!(c.index, 2);
    }

    #[test]
    fn test_corrupt_snapshot_is_set_aside() {
        let (dir, _host, dim) = setup();
        let path = dir.path().join(&dim.config().snapshot_file);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"not a snapshot at all").unwrap();

        let report = dim.ensure_loaded(Utc::now()).unwrap();
        assert!(report.corrupt);
        assert!(dim.instances().is_empty());
        let mut corrupt = path.clone().into_os_string();
        corrupt.push(".corrupt");
        assert!(std::path::Path::new(&corrupt).exists());
    }

    #[test]
    fn test_idle_world_unloads() {
        let (_dir, host, dim) = setup();
        let now = Utc::now();
        dim.get_or_create(A, "alice", now).unwrap();
        let t = now + Duration::seconds(3);
        drain(&dim, t);
        assert!(!dim.tick(t).unloaded);
        assert!(!dim.tick(t + Duration::seconds(29)).unloaded);
        assert!(dim.tick(t + Duration::seconds(30)).unloaded);
        assert_eq!(dim.backing_state(), BackingState::Uninitialized);
        assert!(!host.is_online());

        // Coming back brings it online again
        dim.ensure_backing_world().unwrap();
        assert_eq!(host.bring_online_calls(), 2);
    }

    #[test]
    fn test_occupied_world_stays_loaded() {
        let (_dir, host, dim) = setup();
        dim.ensure_loaded(Utc::now()).unwrap();
        dim.ensure_backing_world().unwrap();
        host.spawn_occupant(A, Location::new(Realm::Backing, 0.5, 128.0, 0.5));
        let now = Utc::now();
        dim.tick(now);
        assert!(!dim.tick(now + Duration::minutes(5)).unloaded);
        assert_eq!(dim.backing_state(), BackingState::Ready);
    }

    #[test]
    fn test_cleanup_marks_idle_instances() {
        let (_dir, _host, dim) = setup();
        let now = Utc::now();
        dim.get_or_create(A, "alice", now).unwrap();
        dim.tick(now);
        let report = dim.tick(now + Duration::hours(2));
        assert_eq!(report.deactivated, 1);
        assert!(report.saved);
        assert!(!dim.instance(A).unwrap().active);
    }

    #[test]
    fn test_remove_and_reset() {
        let (_dir, _host, dim) = setup();
        let now = Utc::now();
        dim.get_or_create(A, "alice", now).unwrap();
        dim.get_or_create(B, "bob", now).unwrap();
        dim.remove(A, now).unwrap();
        assert!(dim.instance(A).is_none());
        assert!(!dim.queue().is_pending(A, TaskKind::Materialize));
        assert!(matches!(dim.remove(A, now), Err(DimensionError::UnknownInstance(_))));
        assert_eq!(dim.reset(now).unwrap().instances, 0);
        assert!(dim.queue().is_empty());
    }

    #[test]
    fn test_get_or_create_requeues_unbuilt_space() {
        let (_dir, _host, dim) = setup();
        let now = Utc::now();
        dim.get_or_create(A, "alice", now).unwrap();
        dim.queue().cancel_owner(A);

        let later = now + Duration::seconds(10);
        let again = dim.get_or_create(A, "alice", later).unwrap();
        assert_eq!(again.state, InstanceState::Queued(TaskKind::Materialize));
        assert_eq!(
            dim.queue().due_at(A, TaskKind::Materialize),
            Some(later + Duration::seconds(3))
        );
        assert_eq!(dim.tick(later + Duration::seconds(3)).materialized, Some(A));
    }

    #[test]
    fn test_unbuilt_space_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        {
            let host = Arc::new(SandboxWorld::new(Some(dir.path().to_path_buf())));
            let dim = PocketDimension::new(DimensionConfig::default(), host).unwrap();
            dim.get_or_create(A, "alice", now).unwrap();
            dim.shutdown(now).unwrap();
        }

        let host = Arc::new(SandboxWorld::new(Some(dir.path().to_path_buf())));
        let dim = PocketDimension::new(DimensionConfig::default(), host).unwrap();
        let report = dim.ensure_loaded(now).unwrap().clone();
        assert_eq!(report.materialize_queued, 1);
        assert_eq!(dim.state_of(A), Some(InstanceState::Queued(TaskKind::Materialize)));

        dim.get_or_create(A, "alice", now).unwrap();
        assert_eq!(dim.queue().pending(TaskKind::Materialize), 1);
        assert_eq!(dim.tick(now).materialized, Some(A));
        assert!(dim.instance(A).unwrap().materialized);
    }

    #[test]
    fn test_repeated_attempts_cannot_hold_a_hole_open() {
        let config = DimensionConfig { unload_delay_ms: 86_400_000, ..Default::default() };
        let (_dir, host, dim) = setup_with(config);
        let now = Utc::now();
        let a = dim.get_or_create(A, "alice", now).unwrap();
        let t = now + Duration::seconds(3);
        drain(&dim, t);

        let door = a.inner.min.offset(-1, 1, 5);
        dim.open_breach(A, door, t).unwrap();

        // B pokes at the hole every 2s, faster than the 3s grace delay
        let mut restored_at = None;
        for step in 1..=30 {
            let at = t + Duration::seconds(2 * step);
            let attempt = Mutation::Place { block: Block::Other(1), existing: host.block(door) };
            assert!(!dim.check_mutation(Actor::Occupant(B), door, attempt, at).is_allowed());
            if dim.tick(at).restored == Some(A) && restored_at.is_none() {
                restored_at = Some(at);
            }
        }
        assert_eq!(restored_at, Some(t + Duration::seconds(4)));
        assert!(host.block(door).is_anchor());
        assert!(!dim.instance(A).unwrap().shell_breached);
    }

    #[test]
    fn test_refused_break_repair_is_not_reported_as_restore() {
        let (_dir, _host, dim) = setup();
        let recorder = Arc::new(Recorder::default());
        dim.add_listener(recorder.clone());
        let now = Utc::now();
        let a = dim.get_or_create(A, "alice", now).unwrap();
        let t = now + Duration::seconds(3);
        drain(&dim, t);

        let brk = Mutation::Break { existing: Block::Anchor };
        dim.check_mutation(Actor::Occupant(B), a.outer.max, brk, t);
        assert!(dim.queue().is_pending(A, TaskKind::RestoreShell));
        assert_eq!(dim.tick(t + Duration::seconds(3)).restored, Some(A));
        assert_eq!(recorder.breached.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.restored.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_deactivation_is_saved_at_once() {
        let config = DimensionConfig {
            save_interval_ms: 3_600_000,
            cleanup_interval_ms: 600_000,
            inactive_threshold_ms: 300_000,
            unload_delay_ms: 86_400_000,
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        {
            let host = Arc::new(SandboxWorld::new(Some(dir.path().to_path_buf())));
            let dim = PocketDimension::new(config.clone(), host).unwrap();
            dim.get_or_create(A, "alice", now).unwrap();
            let t = now + Duration::seconds(3);
            drain(&dim, t);
            let report = dim.tick(t + Duration::minutes(11));
            assert_eq!(report.deactivated, 1);
            assert!(report.saved);
        }

        let host = Arc::new(SandboxWorld::new(Some(dir.path().to_path_buf())));
        let dim = PocketDimension::new(config, host).unwrap();
        dim.ensure_loaded(now).unwrap();
        assert!(!dim.instance(A).unwrap().active);
    }
}
