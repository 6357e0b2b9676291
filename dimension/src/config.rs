//! Dimension configuration
//!
//! Every field has a default, so a JSON file only needs the keys it changes.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::allocator::GridLayout;
use crate::error::{DimensionError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DimensionConfig {
    /// Spaces per grid row
    pub grid_width: u32,
    /// Usable volume, as blocks on each side of the center
    pub half_width: u32,
    pub half_height: u32,
    pub half_depth: u32,
    pub shell_thickness: u32,
    /// Empty blocks between neighbouring shells
    pub padding: u32,
    /// Y coordinate of every space center
    pub altitude: i64,
    /// Horizontal reach of a space for spawns and seeded structures
    pub territory_radius: u32,

    pub materialize_delay_ms: u64,
    pub restore_delay_ms: u64,
    pub retry_delay_ms: u64,
    pub save_interval_ms: u64,
    pub cleanup_interval_ms: u64,
    pub inactive_threshold_ms: u64,
    pub unload_delay_ms: u64,
    pub notice_cooldown_ms: u64,
    /// Upper bound on remembered denial notices
    pub notice_capacity: usize,

    /// Snapshot path, relative to the host's save directory
    pub snapshot_file: String,
}

impl Default for DimensionConfig {
    fn default() -> Self {
        Self {
            grid_width: 10,
            half_width: 15,
            half_height: 7,
            half_depth: 15,
            shell_thickness: 1,
            padding: 767, // 31 + 2 + 767 = 800 blocks between centers
            altitude: 128,
            territory_radius: 400,
            materialize_delay_ms: 3_000,
            restore_delay_ms: 3_000,
            retry_delay_ms: 1_000,
            save_interval_ms: 300_000,
            cleanup_interval_ms: 600_000,
            inactive_threshold_ms: 3_600_000,
            unload_delay_ms: 30_000,
            notice_cooldown_ms: 1_000,
            notice_capacity: 256,
            snapshot_file: "data/pocket_dimensions.dat".to_string(),
        }
    }
}

impl DimensionConfig {
    /// Load and validate a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: DimensionConfig = serde_json::from_str(text)
            .map_err(|e| DimensionError::Config(format!("JSON parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.grid_width == 0 {
            return Err(DimensionError::Config("grid_width must be at least 1".into()));
        }
        if self.half_width == 0 || self.half_height == 0 || self.half_depth == 0 {
            return Err(DimensionError::Config("space half extents must be at least 1".into()));
        }
        if self.shell_thickness == 0 {
            return Err(DimensionError::Config("shell_thickness must be at least 1".into()));
        }
        if GridLayout::from_config(self).max_extent().is_none() {
            return Err(DimensionError::Config(
                "grid does not fit in block coordinates; lower padding, extents or altitude".into(),
            ));
        }
        if self.snapshot_file.is_empty() {
            return Err(DimensionError::Config("snapshot_file must not be empty".into()));
        }
        Ok(())
    }

    pub fn materialize_delay(&self) -> Duration {
        millis(self.materialize_delay_ms)
    }

    pub fn restore_delay(&self) -> Duration {
        millis(self.restore_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        millis(self.retry_delay_ms)
    }

    pub fn save_interval(&self) -> Duration {
        millis(self.save_interval_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        millis(self.cleanup_interval_ms)
    }

    pub fn inactive_threshold(&self) -> Duration {
        millis(self.inactive_threshold_ms)
    }

    pub fn unload_delay(&self) -> Duration {
        millis(self.unload_delay_ms)
    }

    pub fn notice_cooldown(&self) -> Duration {
        millis(self.notice_cooldown_ms)
    }
}

fn millis(ms: u64) -> Duration {
    Duration::milliseconds(ms.min(i64::MAX as u64) as i64)
}
