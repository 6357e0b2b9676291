//! Maintenance System
//!
//! Periodic housekeeping: inactivity sweep and the bounded denial-notice
//! cooldown map.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::components::OwnerId;
use crate::engine::WorldHost;
use crate::registry::Registry;

/// Flag instances idle longer than `threshold` whose owner is not connected.
/// Returns how many were deactivated.
pub fn sweep_inactive(
    registry: &Registry,
    host: &dyn WorldHost,
    threshold: Duration,
    now: DateTime<Utc>,
) -> usize {
    let mut deactivated = 0;
    for inst in registry.snapshot() {
        if !inst.active || now - inst.last_active <= threshold || host.is_connected(inst.owner) {
            continue;
        }
        if registry.update(&inst.owner, |i| i.active = false).is_some() {
            deactivated += 1;
        }
    }
    deactivated
}

/// Per-actor rate limit for denial notices.
///
/// Holds at most `capacity` entries; when full, the oldest entry is dropped.
pub struct CooldownMap {
    last_notice: Mutex<HashMap<OwnerId, DateTime<Utc>>>,
    cooldown: Duration,
    capacity: usize,
}

impl CooldownMap {
    pub fn new(cooldown: Duration, capacity: usize) -> Self {
        Self {
            last_notice: Mutex::new(HashMap::new()),
            cooldown,
            capacity: capacity.max(1),
        }
    }

    /// True when `actor` may be notified now; records the notice if so
    pub fn try_notify(&self, actor: OwnerId, now: DateTime<Utc>) -> bool {
        let mut map = self.last_notice.lock();
        if let Some(last) = map.get(&actor) {
            if now - *last < self.cooldown {
                return false;
            }
        }
        if map.len() >= self.capacity && !map.contains_key(&actor) {
            let oldest = map.iter().min_by_key(|(_, at)| **at).map(|(k, _)| *k);
            if let Some(oldest) = oldest {
                map.remove(&oldest);
            }
        }
        map.insert(actor, now);
        true
    }

    /// Drop entries whose cooldown has passed. Returns how many were removed.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let mut map = self.last_notice.lock();
        let before = map.len();
        map.retain(|_, at| now - *at < self.cooldown);
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.last_notice.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_notice.lock().is_empty()
    }

    pub fn clear(&self) {
        self.last_notice.lock().clear();
    }
}
