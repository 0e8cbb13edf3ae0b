use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::link::LinkStats;

/// Health snapshot written to the status file for an outside watcher.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub uptime_ms: u64,
    pub phase: String,
    pub halt_reason: Option<String>,
    pub calibration_samples: usize,
    // Link
    pub link_level: usize,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub send_interval_ms: u64,
    pub fallback_enabled: bool,
    pub link: LinkStats,
    // Position
    pub dead_reckoned: bool,
    pub location_freshness_ms: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub speed_mps: f64,
    pub fixes_accepted: u64,
    pub fixes_lost: u64,
    // Modem housekeeping
    pub signal_percent: i8,
    pub battery_percent: i8,
}

impl LiveStatus {
    pub fn new() -> Self {
        Self {
            timestamp: current_timestamp(),
            dead_reckoned: true,
            ..Self::default()
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
