//! Persistence module for the instance registry
//!
//! Snapshot file layout:
//! `MAGIC "PKDM" | u32 LE version | lz4(size-prepended, bincode(Snapshot))`.
//! Only stable fields are stored; bounds are re-derived from the slot index
//! on load. Version 1 bodies (no activity timestamp, no breach flag) are
//! still read.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::allocator::GridLayout;
use crate::components::OwnerId;
use crate::error::{DimensionError, Result, SnapshotError, UnavailableReason};
use crate::instance::{Instance, InstanceState};
use crate::registry::Registry;
use crate::scheduler::{TaskKind, TaskQueue};
use crate::world::PocketDimension;

pub const SNAPSHOT_MAGIC: &[u8; 4] = b"PKDM";
pub const SNAPSHOT_VERSION: u32 = 2;
const HEADER_LEN: usize = 8;

// ============================================================================
// Snapshot Data Structures
// ============================================================================

/// Registry state as written to disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub next_index: u32,
    pub records: Vec<SnapshotRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub owner: OwnerId,
    pub display_name: String,
    pub index: u32,
    pub materialized: bool,
    pub content_populated: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub shell_breached: bool,
}

#[derive(Deserialize)]
struct SnapshotV1 {
    next_index: u32,
    records: Vec<RecordV1>,
}

#[derive(Deserialize)]
struct RecordV1 {
    owner: OwnerId,
    display_name: String,
    index: u32,
    materialized: bool,
    content_populated: bool,
    active: bool,
    created_at: DateTime<Utc>,
}

impl From<SnapshotV1> for Snapshot {
    fn from(v1: SnapshotV1) -> Self {
        Snapshot {
            next_index: v1.next_index,
            records: v1
                .records
                .into_iter()
                .map(|r| SnapshotRecord {
                    owner: r.owner,
                    display_name: r.display_name,
                    index: r.index,
                    materialized: r.materialized,
                    content_populated: r.content_populated,
                    active: r.active,
                    created_at: r.created_at,
                    last_active: r.created_at,
                    shell_breached: false,
                })
                .collect(),
        }
    }
}

impl Snapshot {
    /// Copy the registry, ordered by slot
    pub fn capture(registry: &Registry) -> Self {
        Snapshot {
            next_index: registry.next_index(),
            records: registry.snapshot().iter().map(SnapshotRecord::from).collect(),
        }
    }
}

impl From<&Instance> for SnapshotRecord {
    fn from(inst: &Instance) -> Self {
        SnapshotRecord {
            owner: inst.owner,
            display_name: inst.display_name.clone(),
            index: inst.index,
            materialized: inst.materialized,
            content_populated: inst.content_populated,
            active: inst.active,
            created_at: inst.created_at,
            last_active: inst.last_active,
            shell_breached: inst.shell_breached,
        }
    }
}

impl SnapshotRecord {
    /// Rebuild the full record, deriving bounds from the slot
    pub fn to_instance(&self, layout: &GridLayout) -> Instance {
        let mut inst = Instance::new(self.owner, self.display_name.clone(), self.index, layout, self.created_at);
        inst.last_active = self.last_active;
        inst.materialized = self.materialized;
        inst.content_populated = self.content_populated;
        inst.active = self.active;
        inst.shell_breached = self.shell_breached;
        inst.state = match (self.materialized, self.shell_breached) {
            (false, _) => InstanceState::Requested,
            (true, false) => InstanceState::Materialized,
            (true, true) => InstanceState::ShellBreached,
        };
        inst
    }
}

// ============================================================================
// Codec
// ============================================================================

pub fn encode(snapshot: &Snapshot) -> std::result::Result<Vec<u8>, SnapshotError> {
    let body = bincode::serialize(snapshot)?;
    let compressed = lz4_flex::compress_prepend_size(&body);
    let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
    out.extend_from_slice(SNAPSHOT_MAGIC);
    out.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Decode a snapshot file. Returns the snapshot and the version it was written with.
pub fn decode(bytes: &[u8]) -> std::result::Result<(Snapshot, u32), SnapshotError> {
    if bytes.len() < HEADER_LEN {
        return Err(SnapshotError::TooShort(bytes.len()));
    }
    if &bytes[0..4] != SNAPSHOT_MAGIC {
        return Err(SnapshotError::BadMagic);
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version == 0 || version > SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }

    let body = lz4_flex::decompress_size_prepended(&bytes[HEADER_LEN..])
        .map_err(|e| SnapshotError::Decompress(e.to_string()))?;

    let snapshot = match version {
        1 => bincode::deserialize::<SnapshotV1>(&body)?.into(),
        _ => bincode::deserialize::<Snapshot>(&body)?,
    };
    Ok((snapshot, version))
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveStats {
    pub instances: usize,
    pub file_bytes: u64,
}

/// Outcome of the one-time registry load
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub restored: usize,
    /// (owner, stored slot, new slot) for records moved off a duplicate slot
    pub reindexed: Vec<(OwnerId, u32, u32)>,
    /// Unmaterialized spaces whose build was (re-)queued
    pub materialize_queued: usize,
    /// Breached shells whose repair was re-queued
    pub restores_queued: usize,
    /// The file could not be decoded and was set aside
    pub corrupt: bool,
    /// Version of the file read, if one existed
    pub from_version: Option<u32>,
}

pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `relative` under a save directory
    pub fn in_dir(save_dir: &Path, relative: &str) -> Self {
        Self::new(save_dir.join(relative))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write via a temporary sibling, then rename into place
    pub fn write(&self, snapshot: &Snapshot) -> std::result::Result<SaveStats, SnapshotError> {
        let bytes = encode(snapshot)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.sibling("tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(SaveStats {
            instances: snapshot.records.len(),
            file_bytes: bytes.len() as u64,
        })
    }

    /// `Ok(None)` when no snapshot has been written yet
    pub fn read(&self) -> std::result::Result<Option<(Snapshot, u32)>, SnapshotError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        decode(&bytes).map(Some)
    }

    /// Copy an undecodable file aside so the next save cannot destroy it.
    /// An earlier copy is never overwritten; later ones get a timestamp.
    pub fn quarantine(&self) -> io::Result<PathBuf> {
        let mut target = self.sibling("corrupt");
        if target.exists() {
            let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
            target = self.sibling(&format!("corrupt.{}", stamp));
        }
        fs::copy(&self.path, &target)?;
        Ok(target)
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".");
        name.push(suffix);
        self.path.with_file_name(name)
    }
}

// ============================================================================
// Reconciliation
// ============================================================================

/// Load a snapshot into an empty registry.
///
/// Bounds come from the allocator, never from the file. A record whose slot
/// is already held moves to the next free slot and must be materialized
/// again. Every unmaterialized space gets a build queued, breached shells
/// get their repair queued.
pub fn restore_into(
    registry: &Registry,
    queue: &TaskQueue,
    snapshot: Snapshot,
    now: DateTime<Utc>,
) -> LoadReport {
    let layout = *registry.layout();
    let instances: Vec<Instance> = snapshot
        .records
        .par_iter()
        .map(|record| record.to_instance(&layout))
        .collect();

    let mut report = LoadReport::default();
    let mut displaced = Vec::new();
    for inst in instances {
        match registry.insert_restored(inst.clone()) {
            Ok(()) => report.restored += 1,
            Err(DimensionError::AllocationConflict { index, holder, claimant }) => {
                warn!(%claimant, %holder, index, "duplicate slot in snapshot");
                displaced.push(inst);
            }
            Err(e) => warn!(owner = %inst.owner, "skipping record: {}", e),
        }
    }

    for mut inst in displaced {
        let old_index = inst.index;
        let index = registry.allocate_index(inst.owner);
        inst.reindex(index, &layout);
        inst.state = InstanceState::Queued(TaskKind::Materialize);
        if let Err(e) = registry.insert_restored(inst.clone()) {
            error!(owner = %inst.owner, "could not re-slot record: {}", e);
            continue;
        }
        queue.schedule(inst.owner, TaskKind::Materialize, now);
        report.restored += 1;
        report.reindexed.push((inst.owner, old_index, index));
    }

    registry.set_next_index(registry.next_index().max(snapshot.next_index));

    for inst in registry.snapshot() {
        if !inst.materialized {
            queue.schedule_if_absent(inst.owner, TaskKind::Materialize, now);
            registry.update(&inst.owner, |i| i.state = InstanceState::Queued(TaskKind::Materialize));
            report.materialize_queued += 1;
        } else if inst.shell_breached {
            queue.schedule(inst.owner, TaskKind::RestoreShell, now);
            registry.update(&inst.owner, |i| i.state = InstanceState::Queued(TaskKind::RestoreShell));
            report.restores_queued += 1;
        }
    }

    report
}

// ============================================================================
// Orchestrator Integration
// ============================================================================

impl PocketDimension {
    /// Load the registry on first use. Later calls return the same report.
    ///
    /// Fails with `Unavailable(RegistryNotLoaded)` while the host has no
    /// save directory; nothing is latched in that case.
    pub fn ensure_loaded(&self, now: DateTime<Utc>) -> Result<&LoadReport> {
        self.loaded.get_or_try_init(|| self.load_registry(now))
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }

    /// Write the registry now
    pub fn save(&self, now: DateTime<Utc>) -> Result<SaveStats> {
        if !self.is_loaded() {
            return Err(DimensionError::Unavailable(UnavailableReason::RegistryNotLoaded));
        }
        let store = self.store()?;
        let _guard = self.save_lock.lock();
        let stats = store.write(&Snapshot::capture(&self.registry))?;
        self.timers.lock().last_save = Some(now);
        info!(instances = stats.instances, bytes = stats.file_bytes, "saved pocket dimensions");
        Ok(stats)
    }

    /// Save after a mutation-significant event; failures are logged only
    pub(crate) fn persist(&self, now: DateTime<Utc>) {
        if let Err(e) = self.save(now) {
            warn!("failed to save pocket dimensions: {}", e);
        }
    }

    pub(crate) fn store(&self) -> Result<SnapshotStore> {
        let dir = self
            .host
            .save_dir()
            .ok_or(DimensionError::Unavailable(UnavailableReason::RegistryNotLoaded))?;
        Ok(SnapshotStore::in_dir(&dir, &self.config.snapshot_file))
    }

    fn load_registry(&self, now: DateTime<Utc>) -> Result<LoadReport> {
        let store = self.store()?;
        let read = match store.read() {
            Ok(read) => read,
            Err(SnapshotError::Io(e)) => return Err(e.into()),
            Err(e) => {
                let err = DimensionError::CorruptSnapshot(e);
                error!(path = %store.path().display(), "{}", err);
                match store.quarantine() {
                    Ok(copy) => warn!(copy = %copy.display(), "kept a copy of the corrupt snapshot"),
                    Err(copy_err) => error!("could not copy corrupt snapshot: {}", copy_err),
                }
                let report = LoadReport { corrupt: true, ..Default::default() };
                return Ok(report);
            }
        };

        let Some((snapshot, version)) = read else {
            info!("no pocket dimension snapshot, starting empty");
            return Ok(LoadReport::default());
        };

        let mut report = restore_into(&self.registry, &self.queue, snapshot, now);
        report.from_version = Some(version);
        info!(
            restored = report.restored,
            reindexed = report.reindexed.len(),
            version,
            "loaded pocket dimensions"
        );
        if !report.reindexed.is_empty() {
            // Persist the new slots before anything else is written there
            if let Err(e) = store.write(&Snapshot::capture(&self.registry)) {
                warn!("failed to save re-slotted registry: {}", e);
            }
        }
        Ok(report)
    }
}
