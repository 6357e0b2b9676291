//! Tick Runner - background thread that drives `PocketDimension::tick`
//!
//! Optional: hosts with their own simulation loop call `tick` themselves.
//! While a runner is active it is the sole writer.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

use crate::world::{PocketDimension, TickReport};

pub struct TickRunner {
    is_running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl TickRunner {
    pub fn new() -> Self {
        Self {
            is_running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }

    /// Start ticking at a fixed interval
    ///
    /// # Arguments
    /// * `dimension` - Shared dimension to drive
    /// * `interval` - Time between ticks (the host's tick length, e.g. 50ms)
    /// * `callback` - Receives every tick report
    pub fn start<F>(&mut self, dimension: Arc<PocketDimension>, interval: Duration, callback: F)
    where
        F: Fn(TickReport) + Send + 'static,
    {
        if self.is_running.load(Ordering::Relaxed) {
            warn!("tick runner already running");
            return;
        }

        info!(interval_ms = interval.as_millis() as u64, "starting tick runner");
        self.is_running.store(true, Ordering::Relaxed);
        let running = Arc::clone(&self.is_running);

        let handle = thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                let report = dimension.tick(Utc::now());
                callback(report);
                thread::sleep(interval);
            }
            info!("tick runner stopped");
        });

        self.thread_handle = Some(handle);
    }

    pub fn stop(&mut self) {
        if !self.is_running.load(Ordering::Relaxed) {
            return;
        }

        self.is_running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }
}

impl Default for TickRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TickRunner {
    fn drop(&mut self) {
        self.stop();
    }
}
