//! Inertial sensor boundary.
//!
//! The hardware driver is a collaborator; the core only needs one fused
//! sample per tick. `SimulatedImu` stands in for it in the binary and tests.

use std::f64::consts::PI;

use log::warn;

use crate::error::{TelemetryError, TelemetryResult};
use crate::types::{ImuSample, Vec3};

pub trait ImuSource {
    fn read(&mut self) -> TelemetryResult<ImuSample>;
}

/// Synthetic sensor: a fixed mounting bias plus a slow periodic manoeuvre.
#[derive(Clone, Debug)]
pub struct SimulatedImu {
    /// Constant accelerometer offset, g.
    pub bias_g: Vec3,
    pub gyro_bias: Vec3,
    /// Mounting tilt reported in roll/pitch, degrees.
    pub mount_roll_deg: f64,
    pub mount_pitch_deg: f64,
    /// Peak manoeuvre acceleration, g. Zero keeps the unit at rest.
    pub amplitude_g: f64,
    /// Samples before motion starts, so calibration sees a still unit.
    pub still_samples: u64,
    pub sample_period_s: f64,
    /// Fail every read after this many samples.
    pub fail_after: Option<u64>,
    samples: u64,
}

impl Default for SimulatedImu {
    fn default() -> Self {
        Self {
            bias_g: Vec3::new(0.01, -0.02, 0.005),
            gyro_bias: Vec3::new(0.002, -0.001, 0.0005),
            mount_roll_deg: 1.5,
            mount_pitch_deg: -0.8,
            amplitude_g: 0.05,
            still_samples: 1_600,
            sample_period_s: 0.02,
            fail_after: None,
            samples: 0,
        }
    }
}

impl SimulatedImu {
    pub fn at_rest() -> Self {
        Self {
            amplitude_g: 0.0,
            ..Self::default()
        }
    }

    /// At rest, but every read from sample `n` on fails.
    pub fn failing_after(n: u64) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::at_rest()
        }
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
}

impl ImuSource for SimulatedImu {
    fn read(&mut self) -> TelemetryResult<ImuSample> {
        if let Some(limit) = self.fail_after {
            if self.samples >= limit {
                warn!("simulated IMU stopped responding after {limit} samples");
                return Err(TelemetryError::SensorFailed("imu read timed out".into()));
            }
        }
        let n = self.samples;
        self.samples += 1;

        let moving = n.saturating_sub(self.still_samples) as f64 * self.sample_period_s;
        let (manoeuvre, yaw_rate) = if n < self.still_samples {
            (Vec3::zeros(), 0.0)
        } else {
            // Gentle accelerate/brake cycle with a weave.
            let a = self.amplitude_g;
            (
                Vec3::new((moving * 0.2 * PI).sin() * a * 0.3, (moving * 0.1 * PI).sin() * a, 0.0),
                (moving * 0.5).sin() * 0.1 * a,
            )
        };

        Ok(ImuSample {
            linear_accel_g: self.bias_g + manoeuvre,
            gyro: self.gyro_bias + Vec3::new(0.0, 0.0, yaw_rate),
            roll_deg: self.mount_roll_deg,
            pitch_deg: self.mount_pitch_deg,
            yaw_deg: (moving * 2.0).rem_euclid(360.0),
        })
    }
}
