//! Startup bias estimation.
//!
//! The unit must sit still while this runs: after a settle delay the session
//! averages raw linear acceleration and gyro rate over a fixed window, then
//! derives a roll/pitch offset from the gravity direction of that average.
//! The session is fed once per scheduler tick and never blocks.

use log::{debug, info};

use crate::config::InertialConfig;
use crate::error::{TelemetryError, TelemetryResult};
use crate::types::{ImuSample, Vec3};

/// Offsets subtracted from every raw sample. Immutable until the next
/// calibration.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CalibrationBias {
    /// g
    pub acceleration_offset: Vec3,
    /// rad/s
    pub gyro_offset: Vec3,
    /// roll, pitch, yaw in degrees
    pub orientation_offset: Vec3,
}

impl CalibrationBias {
    /// Batch form of the session: average `samples` and take the attitude
    /// of the last one as the sensor's own roll/pitch at calibration time.
    pub fn from_samples(samples: &[ImuSample], min_samples: usize) -> TelemetryResult<Self> {
        let mut acc = BiasAccumulator::default();
        for sample in samples {
            acc.add(sample);
        }
        acc.finish(min_samples)
    }
}

#[derive(Clone, Debug, Default)]
struct BiasAccumulator {
    accel_sum: Vec3,
    gyro_sum: Vec3,
    count: usize,
    attitude: (f64, f64),
}

impl BiasAccumulator {
    fn add(&mut self, sample: &ImuSample) {
        self.accel_sum += sample.linear_accel_g;
        self.gyro_sum += sample.gyro;
        self.count += 1;
        self.attitude = (sample.roll_deg, sample.pitch_deg);
    }

    fn finish(&self, min_samples: usize) -> TelemetryResult<CalibrationBias> {
        // Guards the averaging division below.
        let required = min_samples.max(1);
        if self.count < required {
            return Err(TelemetryError::InsufficientCalibrationSamples {
                collected: self.count,
                required,
            });
        }

        let n = self.count as f64;
        let accel = self.accel_sum / n;
        let gyro = self.gyro_sum / n;
        let (roll, pitch) = self.attitude;

        let roll_offset = -accel.y.atan2(accel.z).to_degrees() + roll;
        let pitch_offset = -(-accel.x)
            .atan2((accel.y * accel.y + accel.z * accel.z).sqrt())
            .to_degrees()
            + pitch;

        Ok(CalibrationBias {
            acceleration_offset: accel,
            gyro_offset: gyro,
            // No absolute heading reference without a magnetometer.
            orientation_offset: Vec3::new(roll_offset, pitch_offset, 0.0),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CalibrationProgress {
    Settling,
    Sampling { collected: usize },
    Complete(CalibrationBias),
}

/// Non-blocking calibration driven by the scheduler tick.
pub struct CalibrationSession {
    started_at: u64,
    settle_ms: u64,
    window_ms: u64,
    sample_interval_ms: u64,
    min_samples: usize,
    last_sample: Option<u64>,
    acc: BiasAccumulator,
}

impl CalibrationSession {
    pub fn new(config: &InertialConfig, started_at: u64) -> Self {
        Self {
            started_at,
            settle_ms: config.calibration_settle_ms,
            window_ms: config.calibration_window_ms,
            sample_interval_ms: config.update_interval_ms,
            min_samples: config.min_calibration_samples,
            last_sample: None,
            acc: BiasAccumulator::default(),
        }
    }

    pub fn collected(&self) -> usize {
        self.acc.count
    }

    /// Offer the current raw sample. Fails only when the window closes
    /// without enough samples.
    pub fn feed(&mut self, now: u64, sample: &ImuSample) -> TelemetryResult<CalibrationProgress> {
        let elapsed = now.saturating_sub(self.started_at);

        if elapsed > self.settle_ms + self.window_ms {
            let bias = self.acc.finish(self.min_samples)?;
            info!(
                "calibration complete: {} samples, accel offset {:?}, gyro offset {:?}, orientation offset {:?}",
                self.acc.count, bias.acceleration_offset, bias.gyro_offset, bias.orientation_offset
            );
            return Ok(CalibrationProgress::Complete(bias));
        }

        if elapsed < self.settle_ms {
            return Ok(CalibrationProgress::Settling);
        }

        let due = self
            .last_sample
            .is_none_or(|t| now.saturating_sub(t) >= self.sample_interval_ms);
        if due {
            self.last_sample = Some(now);
            self.acc.add(sample);
            if self.acc.count % 250 == 0 {
                debug!("calibration: {} samples", self.acc.count);
            }
        }

        Ok(CalibrationProgress::Sampling { collected: self.acc.count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sample(ax: f64, ay: f64, az: f64, gz: f64) -> ImuSample {
        ImuSample {
            linear_accel_g: Vec3::new(ax, ay, az),
            gyro: Vec3::new(0.0, 0.0, gz),
            roll_deg: 0.0,
            pitch_deg: 0.0,
            yaw_deg: 12.0,
        }
    }

    #[test]
    fn test_empty_samples_rejected() {
        let err = CalibrationBias::from_samples(&[], 1).unwrap_err();
        assert_eq!(
            err,
            TelemetryError::InsufficientCalibrationSamples { collected: 0, required: 1 }
        );
    }

    #[test]
    fn test_zero_minimum_still_guards_division() {
        assert!(CalibrationBias::from_samples(&[], 0).is_err());
    }

    #[test]
    fn test_averages_offsets() {
        let samples = [sample(0.02, 0.0, 1.0, 0.01), sample(0.04, 0.0, 1.0, 0.03)];
        let bias = CalibrationBias::from_samples(&samples, 2).unwrap();
        assert_abs_diff_eq!(bias.acceleration_offset.x, 0.03, epsilon = 1e-12);
        assert_abs_diff_eq!(bias.gyro_offset.z, 0.02, epsilon = 1e-12);
        assert_eq!(bias.orientation_offset.z, 0.0);
    }

    #[test]
    fn test_orientation_offset_from_gravity_direction() {
        // Gravity split evenly between y and z: 45° roll.
        let mut s = sample(0.0, 1.0, 1.0, 0.0);
        s.roll_deg = 10.0;
        s.pitch_deg = -2.0;
        let bias = CalibrationBias::from_samples(&[s], 1).unwrap();
        assert_abs_diff_eq!(bias.orientation_offset.x, -45.0 + 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bias.orientation_offset.y, -2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_session_phases() {
        let config = InertialConfig {
            calibration_settle_ms: 100,
            calibration_window_ms: 100,
            min_calibration_samples: 3,
            ..InertialConfig::default()
        };
        let mut session = CalibrationSession::new(&config, 0);
        let s = sample(0.01, 0.0, 0.0, 0.0);

        assert_eq!(session.feed(50, &s).unwrap(), CalibrationProgress::Settling);
        assert_eq!(session.feed(100, &s).unwrap(), CalibrationProgress::Sampling { collected: 1 });
        // Inside the sample interval: ignored.
        assert_eq!(session.feed(110, &s).unwrap(), CalibrationProgress::Sampling { collected: 1 });
        for t in (120..=200).step_by(20) {
            session.feed(t, &s).unwrap();
        }
        assert_eq!(session.collected(), 6);

        match session.feed(201, &s).unwrap() {
            CalibrationProgress::Complete(bias) => {
                assert_abs_diff_eq!(bias.acceleration_offset.x, 0.01, epsilon = 1e-12)
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn test_session_without_samples_fails() {
        let config = InertialConfig {
            calibration_settle_ms: 10,
            calibration_window_ms: 10,
            ..InertialConfig::default()
        };
        let mut session = CalibrationSession::new(&config, 0);
        let result = session.feed(1_000, &ImuSample::default());
        assert!(matches!(
            result,
            Err(TelemetryError::InsufficientCalibrationSamples { collected: 0, .. })
        ));
    }
}
