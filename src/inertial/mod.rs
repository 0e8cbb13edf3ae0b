//! Inertial dead reckoning.
//!
//! Integrates bias-corrected, EMA-smoothed linear acceleration into velocity
//! and a displacement that is only meaningful since the last accepted fix.

pub mod calibration;

pub use calibration::{CalibrationBias, CalibrationProgress, CalibrationSession};

use log::debug;

use crate::config::InertialConfig;
use crate::types::{ImuSample, Vec3, EARTH_RADIUS_M, STANDARD_GRAVITY};

/// Mutable estimator state. Only `InertialEstimator` writes it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InertialState {
    /// m/s², bias-corrected, unsmoothed
    pub instantaneous_acceleration: Vec3,
    /// m/s²
    pub smoothed_acceleration: Vec3,
    /// rad/s
    pub angular_velocity: Vec3,
    /// roll, pitch, yaw in rad
    pub orientation: Vec3,
    /// m/s
    pub velocity: Vec3,
    /// meters in the local tangent frame (x east, y north, z up)
    pub displacement: Vec3,
    pub stationary_streak: u32,
    pub last_update: u64,
}

pub struct InertialEstimator {
    config: InertialConfig,
    bias: CalibrationBias,
    state: InertialState,
}

impl InertialEstimator {
    /// `now` starts the first integration interval.
    pub fn new(config: InertialConfig, bias: CalibrationBias, now: u64) -> Self {
        Self {
            config,
            bias,
            state: InertialState {
                last_update: now,
                ..InertialState::default()
            },
        }
    }

    /// Advance the estimate with the latest raw sample. Returns `false`
    /// without touching state when less than the minimum update interval
    /// has elapsed.
    pub fn update(&mut self, now: u64, sample: &ImuSample) -> bool {
        let elapsed = now.saturating_sub(self.state.last_update);
        if elapsed < self.config.update_interval_ms {
            return false;
        }
        let dt = elapsed as f64 / 1000.0;
        self.state.last_update = now;

        let alpha = self.config.ema_alpha;
        let bias = &self.bias;
        let state = &mut self.state;

        state.instantaneous_acceleration =
            (sample.linear_accel_g - bias.acceleration_offset) * STANDARD_GRAVITY;
        state.smoothed_acceleration =
            state.instantaneous_acceleration * alpha + state.smoothed_acceleration * (1.0 - alpha);
        state.angular_velocity = sample.gyro - bias.gyro_offset;
        state.orientation = (Vec3::new(sample.roll_deg, sample.pitch_deg, sample.yaw_deg)
            - bias.orientation_offset)
            .map(f64::to_radians);

        let acceleration = state.smoothed_acceleration;
        self.integrate(acceleration, dt);
        self.update_stationarity();
        true
    }

    /// One dead-reckoning step: trapezoidal displacement over the velocity
    /// at both ends of the step, then `v += a·dt`.
    pub fn integrate(&mut self, acceleration: Vec3, dt: f64) {
        let v_prev = self.state.velocity;
        let v_next = v_prev + acceleration * dt;
        self.state.displacement += (v_prev + v_next) * 0.5 * dt;
        self.state.velocity = v_next;
    }

    // Low velocity OR low acceleration counts toward the streak.
    fn update_stationarity(&mut self) {
        let threshold = self.config.stationary_threshold;
        let accel_mag = self.state.instantaneous_acceleration.norm();
        let speed = self.state.velocity.norm();

        if speed < threshold || accel_mag < threshold {
            self.state.stationary_streak = self.state.stationary_streak.saturating_add(1);
        } else {
            self.state.stationary_streak = 0;
        }

        if self.state.stationary_streak > self.config.stationary_streak_limit {
            if self.state.velocity != Vec3::zeros() {
                debug!(
                    "zero-velocity clamp after {} still ticks (was {:.3} m/s)",
                    self.state.stationary_streak, speed
                );
            }
            self.state.velocity = Vec3::zeros();
        }
    }

    /// Project the current displacement onto a geographic point using a
    /// flat-Earth approximation. Returns (longitude, latitude, altitude).
    ///
    /// Undefined at the poles, where `cos(latitude)` vanishes.
    pub fn new_location(&self, longitude: f64, latitude: f64, altitude: f64) -> Vec3 {
        let d = &self.state.displacement;
        let delta_lat = (d.y / EARTH_RADIUS_M).to_degrees();
        let delta_lon = (d.x / (EARTH_RADIUS_M * latitude.to_radians().cos())).to_degrees();
        Vec3::new(longitude + delta_lon, latitude + delta_lat, altitude + d.z)
    }

    pub fn reset_displacement(&mut self) {
        self.state.displacement = Vec3::zeros();
    }

    pub fn state(&self) -> &InertialState {
        &self.state
    }

    pub fn bias(&self) -> &CalibrationBias {
        &self.bias
    }

    pub fn velocity(&self) -> Vec3 {
        self.state.velocity
    }

    /// Smoothed acceleration, the value reported downstream.
    pub fn acceleration(&self) -> Vec3 {
        self.state.smoothed_acceleration
    }

    pub fn angular_velocity(&self) -> Vec3 {
        self.state.angular_velocity
    }

    pub fn orientation(&self) -> Vec3 {
        self.state.orientation
    }

    pub fn displacement(&self) -> Vec3 {
        self.state.displacement
    }
}
