//! Deferred task queue
//!
//! Holds at most one task per (owner, kind). Scheduling again replaces the
//! due time instead of stacking a duplicate. Due tasks are handed out
//! earliest-first, FIFO among equal due times.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::components::OwnerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskKind {
    /// Write the shell, floor and lights of a new space
    Materialize,
    /// Repair breached shell coordinates
    RestoreShell,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredTask {
    pub owner: OwnerId,
    pub kind: TaskKind,
    pub due: DateTime<Utc>,
    /// Insertion order, for FIFO among equal due times
    pub sequence: u64,
}

impl DeferredTask {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due <= now
    }
}

pub struct TaskQueue {
    tasks: Mutex<HashMap<(OwnerId, TaskKind), DeferredTask>>,
    sequence: AtomicU64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Enqueue a task, replacing the due time of an outstanding one.
    /// Returns true when no task of this kind was pending for the owner.
    pub fn schedule(&self, owner: OwnerId, kind: TaskKind, due: DateTime<Utc>) -> bool {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let task = DeferredTask { owner, kind, due, sequence };
        self.tasks.lock().insert((owner, kind), task).is_none()
    }

    /// Enqueue a task; an outstanding one keeps its due time if that is
    /// earlier. Repeated requests can pull a task forward, never push it back.
    pub fn schedule_earliest(&self, owner: OwnerId, kind: TaskKind, due: DateTime<Utc>) -> bool {
        let mut tasks = self.tasks.lock();
        if let Some(task) = tasks.get_mut(&(owner, kind)) {
            task.due = task.due.min(due);
            return false;
        }
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        tasks.insert((owner, kind), DeferredTask { owner, kind, due, sequence });
        true
    }

    /// Enqueue only if nothing of this kind is pending for the owner
    pub fn schedule_if_absent(&self, owner: OwnerId, kind: TaskKind, due: DateTime<Utc>) -> bool {
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(&(owner, kind)) {
            return false;
        }
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        tasks.insert((owner, kind), DeferredTask { owner, kind, due, sequence });
        true
    }

    pub fn is_pending(&self, owner: OwnerId, kind: TaskKind) -> bool {
        self.tasks.lock().contains_key(&(owner, kind))
    }

    pub fn due_at(&self, owner: OwnerId, kind: TaskKind) -> Option<DateTime<Utc>> {
        self.tasks.lock().get(&(owner, kind)).map(|t| t.due)
    }

    /// Next due task of `kind` without removing it
    pub fn peek_due(&self, kind: TaskKind, now: DateTime<Utc>) -> Option<DeferredTask> {
        let tasks = self.tasks.lock();
        Self::earliest_due(&tasks, kind, now).cloned()
    }

    /// Remove and return the next due task of `kind`
    pub fn pop_due(&self, kind: TaskKind, now: DateTime<Utc>) -> Option<DeferredTask> {
        let mut tasks = self.tasks.lock();
        let key = Self::earliest_due(&tasks, kind, now).map(|t| (t.owner, t.kind))?;
        tasks.remove(&key)
    }

    /// Drop every task for an owner
    pub fn cancel_owner(&self, owner: OwnerId) {
        self.tasks.lock().retain(|(o, _), _| *o != owner);
    }

    /// Number of outstanding tasks of `kind`
    pub fn pending(&self, kind: TaskKind) -> usize {
        self.tasks.lock().keys().filter(|(_, k)| *k == kind).count()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    pub fn clear(&self) {
        self.tasks.lock().clear();
    }

    fn earliest_due(
        tasks: &HashMap<(OwnerId, TaskKind), DeferredTask>,
        kind: TaskKind,
        now: DateTime<Utc>,
    ) -> Option<&DeferredTask> {
        tasks
            .values()
            .filter(|t| t.kind == kind && t.is_due(now))
            .min_by_key(|t| (t.due, t.sequence))
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
