//! Immutable unit configuration, loaded once at startup.
//!
//! Every field has the firmware's reference value as its default, so a
//! partial JSON file only needs to name what it overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{TelemetryError, TelemetryResult};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub network: NetworkConfig,
    pub broker: BrokerConfig,
    pub fallback: FallbackConfig,
    pub inertial: InertialConfig,
    pub fusion: FusionConfig,
    pub link: LinkConfig,
    pub modem: ModemConfig,
}

// ─── Network / broker / fallback ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub apn: String,
    pub user: String,
    pub password: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            apn: "mci".to_string(),
            user: String::new(),
            password: String::new(),
        }
    }
}

/// How hard the data channel should try to deliver a published frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryGuarantee {
    /// Fire-and-forget; the ack only means the frame left the unit.
    #[default]
    AtMostOnce,
    /// The ack means the broker acknowledged the frame.
    AtLeastOnce,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub endpoint: String,
    pub port: u16,
    pub client_id: String,
    pub topic: String,
    pub delivery: DeliveryGuarantee,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            endpoint: "broker.hivemq.com".to_string(),
            port: 1883,
            client_id: "vt".to_string(),
            topic: "ut-cps/vehicle-monitoring".to_string(),
            delivery: DeliveryGuarantee::AtMostOnce,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub destination_number: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            destination_number: "+989210391148".to_string(),
        }
    }
}

// ─── Inertial estimator ──────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct InertialConfig {
    pub update_interval_ms: u64,
    pub ema_alpha: f64,
    pub stationary_threshold: f64,
    pub stationary_streak_limit: u32,
    pub calibration_settle_ms: u64,
    pub calibration_window_ms: u64,
    pub min_calibration_samples: usize,
}

impl Default for InertialConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 20,
            ema_alpha: 0.1,
            stationary_threshold: 0.5,
            stationary_streak_limit: 150,
            calibration_settle_ms: 15_000,
            calibration_window_ms: 15_000,
            min_calibration_samples: 50,
        }
    }
}

// ─── Fusion ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub fix_poll_interval_ms: u64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self { fix_poll_interval_ms: 1000 }
    }
}

// ─── Link quality ────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Send interval per stability level; index = level.
    pub send_intervals_ms: Vec<u64>,
    /// Whether the fallback channel is also used per stability level.
    pub fallback_enabled: Vec<bool>,
    pub promotion_threshold: u32,
    pub demotion_threshold: u32,
    pub service_interval_ms: u64,
    pub reconnect_interval_ms: u64,
    pub network_reattach_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            send_intervals_ms: vec![30_000, 150_000, 300_000, 600_000],
            fallback_enabled: vec![false, false, false, true],
            promotion_threshold: 20,
            demotion_threshold: 3,
            service_interval_ms: 500,
            reconnect_interval_ms: 5_000,
            network_reattach_ms: 30_000,
        }
    }
}

impl LinkConfig {
    /// Highest (slowest) stability level.
    pub fn worst_level(&self) -> usize {
        self.send_intervals_ms.len().saturating_sub(1)
    }
}

// ─── Modem ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemConfig {
    pub command_timeout_ms: u64,
    pub status_poll_interval_ms: u64,
    pub attach_timeout_ms: u64,
    pub response_capacity: usize,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 5_000,
            status_poll_interval_ms: 5_000,
            attach_timeout_ms: 60_000,
            response_capacity: 256,
        }
    }
}

impl TelemetryConfig {
    pub fn load(path: &Path) -> TelemetryResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: TelemetryConfig = serde_json::from_str(&text)
            .map_err(|e| TelemetryError::InvalidConfig(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TelemetryResult<()> {
        let link = &self.link;
        if link.send_intervals_ms.is_empty() {
            return Err(invalid("send interval table is empty"));
        }
        if link.send_intervals_ms.len() != link.fallback_enabled.len() {
            return Err(invalid(format!(
                "send interval table has {} levels but fallback table has {}",
                link.send_intervals_ms.len(),
                link.fallback_enabled.len()
            )));
        }
        if link.send_intervals_ms.windows(2).any(|w| w[1] < w[0]) {
            return Err(invalid("send intervals must not decrease with level"));
        }
        if link.promotion_threshold == 0 || link.demotion_threshold == 0 {
            return Err(invalid("promotion and demotion thresholds must be positive"));
        }
        let alpha = self.inertial.ema_alpha;
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(invalid(format!("ema_alpha {alpha} outside (0, 1]")));
        }
        if self.inertial.min_calibration_samples == 0 {
            return Err(invalid("min_calibration_samples must be at least 1"));
        }
        if self.modem.response_capacity < 16 {
            return Err(invalid("response_capacity too small for any modem reply"));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> TelemetryError {
    TelemetryError::InvalidConfig(msg.into())
}
