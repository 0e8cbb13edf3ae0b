pub mod linalg;

pub use linalg::*;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Wall-clock time as reported by the modem's network clock.
///
/// All-zero is the "unknown" sentinel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    pub second: u8,
    pub minute: u8,
    pub hour: u8,
    pub day: u8,
    pub month: u8,
    pub year: u16,
}

impl Timestamp {
    pub const UNKNOWN: Timestamp = Timestamp {
        second: 0,
        minute: 0,
        hour: 0,
        day: 0,
        month: 0,
        year: 0,
    };

    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }

    /// Calendar interpretation, `None` for the sentinel or an impossible date.
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(i32::from(self.year), u32::from(self.month), u32::from(self.day))?
            .and_hms_opt(
                u32::from(self.hour),
                u32::from(self.minute),
                u32::from(self.second),
            )
    }
}

/// One raw reading from the inertial sensor's on-chip fusion.
///
/// `linear_accel_g` is gravity-compensated linear acceleration in g,
/// `gyro` is angular rate in rad/s, and roll/pitch/yaw are in degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ImuSample {
    pub linear_accel_g: Vec3,
    pub gyro: Vec3,
    pub roll_deg: f64,
    pub pitch_deg: f64,
    pub yaw_deg: f64,
}

/// Satellite position fix. `captured_at` is the monotonic ms at which the
/// fix response was parsed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub longitude: f64,
    pub latitude: f64,
    pub altitude: f64,
    pub speed_mps: f64,
    pub heading_deg: f64,
    pub satellites: u8,
    pub captured_at: u64,
    pub valid: bool,
}

/// Modem-side readings that accompany every transmitted snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Housekeeping {
    pub time: Timestamp,
    /// 0..=100, negative sentinel when the query failed.
    pub signal_percent: i8,
    /// 0..=100, negative means external power (or a failed query).
    pub battery_percent: i8,
}

impl Default for Housekeeping {
    fn default() -> Self {
        Self {
            time: Timestamp::UNKNOWN,
            signal_percent: crate::modem::SENTINEL_UNAVAILABLE,
            battery_percent: crate::modem::SENTINEL_UNAVAILABLE,
        }
    }
}

/// Fused snapshot handed to the codec. Recreated every transmission cycle.
///
/// `location` is (longitude, latitude, altitude).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VehicleStatus {
    pub time: Timestamp,
    pub acceleration: WireVec3,
    pub velocity: WireVec3,
    pub angular_velocity: WireVec3,
    pub orientation: WireVec3,
    pub location: WireVec3,
    pub is_location_dead_reckoned: bool,
    pub location_freshness_ms: u32,
    pub signal_strength_percent: i8,
    pub battery_percent: i8,
}

impl VehicleStatus {
    pub fn speed(&self) -> f32 {
        self.velocity.norm()
    }

    pub fn acceleration_magnitude(&self) -> f32 {
        self.acceleration.norm()
    }

    pub fn on_external_power(&self) -> bool {
        self.battery_percent < 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_timestamp_has_no_datetime() {
        assert!(Timestamp::UNKNOWN.is_unknown());
        assert!(Timestamp::UNKNOWN.to_datetime().is_none());
    }

    #[test]
    fn test_timestamp_to_datetime() {
        let ts = Timestamp { second: 5, minute: 4, hour: 3, day: 2, month: 1, year: 2025 };
        let dt = ts.to_datetime().unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M:%S").to_string(), "2025-01-02 03:04:05");
    }

    #[test]
    fn test_status_magnitudes() {
        let status = VehicleStatus {
            time: Timestamp::UNKNOWN,
            acceleration: WireVec3::new(0.0, 3.0, 4.0),
            velocity: WireVec3::new(6.0, 8.0, 0.0),
            angular_velocity: WireVec3::zeros(),
            orientation: WireVec3::zeros(),
            location: WireVec3::zeros(),
            is_location_dead_reckoned: false,
            location_freshness_ms: 0,
            signal_strength_percent: 50,
            battery_percent: -1,
        };
        assert_eq!(status.speed(), 10.0);
        assert_eq!(status.acceleration_magnitude(), 5.0);
        assert!(status.on_external_power());
    }
}
