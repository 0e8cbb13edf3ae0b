// fusion.rs — Fix-or-extrapolate coordinator
//
// Owns the inertial estimator and the last accepted satellite fix, and turns
// them into the location reported downstream: the fix itself while it is
// fresh, otherwise the last fix displaced by dead reckoning.

use std::collections::VecDeque;

use log::{debug, info, warn};

use crate::config::{FusionConfig, InertialConfig};
use crate::error::{TelemetryError, TelemetryResult};
use crate::inertial::{CalibrationBias, InertialEstimator};
use crate::types::{Housekeeping, ImuSample, PositionFix, Vec3, VehicleStatus};

// ─── Position source ─────────────────────────────────────────────────────────

/// Asynchronous fix provider. A request is answered by a later `poll_fix`.
pub trait PositionSource {
    fn request_fix(&mut self, now: u64);

    /// The outcome of the last request, once, when it is available.
    fn poll_fix(&mut self) -> Option<TelemetryResult<PositionFix>>;
}

/// Hands out pre-recorded fix outcomes, one per request, stamped with the
/// request time.
#[derive(Debug, Default)]
pub struct ScriptedPositionSource {
    pub outcomes: VecDeque<TelemetryResult<PositionFix>>,
    pub requests: u32,
    answer: Option<TelemetryResult<PositionFix>>,
}

impl ScriptedPositionSource {
    pub fn new(outcomes: impl IntoIterator<Item = TelemetryResult<PositionFix>>) -> Self {
        Self {
            outcomes: outcomes.into_iter().collect(),
            ..Self::default()
        }
    }
}

impl PositionSource for ScriptedPositionSource {
    fn request_fix(&mut self, now: u64) {
        self.requests += 1;
        let outcome = self.outcomes.pop_front().unwrap_or(Err(TelemetryError::NoFix));
        self.answer = Some(outcome.map(|fix| PositionFix { captured_at: now, ..fix }));
    }

    fn poll_fix(&mut self) -> Option<TelemetryResult<PositionFix>> {
        self.answer.take()
    }
}

// ─── Coordinator ─────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixUpdate {
    Accepted,
    Lost,
}

pub struct FusionCoordinator {
    config: FusionConfig,
    estimator: InertialEstimator,
    last_fix: PositionFix,
    fix_fresh: bool,
    last_fix_request: Option<u64>,
    fixes_accepted: u64,
    fixes_lost: u64,
}

impl FusionCoordinator {
    pub fn new(config: FusionConfig, inertial: InertialConfig, bias: CalibrationBias, now: u64) -> Self {
        Self {
            config,
            estimator: InertialEstimator::new(inertial, bias, now),
            last_fix: PositionFix::default(),
            fix_fresh: false,
            last_fix_request: None,
            fixes_accepted: 0,
            fixes_lost: 0,
        }
    }

    /// One scheduler tick: advance the estimator, then `poll_position`.
    pub fn tick<P: PositionSource>(
        &mut self,
        now: u64,
        sample: &ImuSample,
        source: &mut P,
    ) -> Option<FixUpdate> {
        self.estimator.update(now, sample);
        self.poll_position(now, source)
    }

    /// Ask for a fix when the poll interval has elapsed and fold in
    /// whatever fix outcome arrived.
    pub fn poll_position<P: PositionSource>(&mut self, now: u64, source: &mut P) -> Option<FixUpdate> {
        let due = self
            .last_fix_request
            .is_none_or(|last| now.saturating_sub(last) >= self.config.fix_poll_interval_ms);
        if due {
            self.last_fix_request = Some(now);
            source.request_fix(now);
        }

        source.poll_fix().map(|outcome| match outcome {
            Ok(fix) => {
                self.accept_fix(fix);
                FixUpdate::Accepted
            }
            Err(e) => {
                self.lose_fix(&e);
                FixUpdate::Lost
            }
        })
    }

    pub fn accept_fix(&mut self, fix: PositionFix) {
        if !self.fix_fresh {
            info!(
                "fix acquired: lat {:.6} lon {:.6} alt {:.1} ({} sats)",
                fix.latitude, fix.longitude, fix.altitude, fix.satellites
            );
        }
        self.last_fix = fix;
        self.fix_fresh = true;
        self.fixes_accepted += 1;
        self.estimator.reset_displacement();
    }

    fn lose_fix(&mut self, reason: &TelemetryError) {
        if self.fix_fresh {
            warn!("fix lost ({reason}), dead reckoning from last fix");
        } else {
            debug!("still no fix: {reason}");
        }
        self.fix_fresh = false;
        self.fixes_lost += 1;
    }

    pub fn is_fix_fresh(&self) -> bool {
        self.fix_fresh
    }

    pub fn last_fix(&self) -> &PositionFix {
        &self.last_fix
    }

    pub fn fixes_accepted(&self) -> u64 {
        self.fixes_accepted
    }

    pub fn fixes_lost(&self) -> u64 {
        self.fixes_lost
    }

    pub fn estimator(&self) -> &InertialEstimator {
        &self.estimator
    }

    pub fn estimator_mut(&mut self) -> &mut InertialEstimator {
        &mut self.estimator
    }

    /// (longitude, latitude, altitude) reported for the current mode.
    pub fn location(&self) -> Vec3 {
        let fix = &self.last_fix;
        if self.fix_fresh {
            Vec3::new(fix.longitude, fix.latitude, fix.altitude)
        } else {
            self.estimator.new_location(fix.longitude, fix.latitude, fix.altitude)
        }
    }

    /// Milliseconds since the last accepted fix was captured, saturating.
    pub fn location_freshness_ms(&self, now: u64) -> u32 {
        u32::try_from(now.saturating_sub(self.last_fix.captured_at)).unwrap_or(u32::MAX)
    }

    pub fn vehicle_status(&self, now: u64, housekeeping: &Housekeeping) -> VehicleStatus {
        VehicleStatus {
            time: housekeeping.time,
            acceleration: self.estimator.acceleration().cast::<f32>(),
            velocity: self.estimator.velocity().cast::<f32>(),
            angular_velocity: self.estimator.angular_velocity().cast::<f32>(),
            orientation: self.estimator.orientation().cast::<f32>(),
            location: self.location().cast::<f32>(),
            is_location_dead_reckoned: !self.fix_fresh,
            location_freshness_ms: self.location_freshness_ms(now),
            signal_strength_percent: housekeeping.signal_percent,
            battery_percent: housekeeping.battery_percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn fix(lat: f64, lon: f64, alt: f64) -> PositionFix {
        PositionFix {
            latitude: lat,
            longitude: lon,
            altitude: alt,
            valid: true,
            satellites: 8,
            ..PositionFix::default()
        }
    }

    fn coordinator() -> FusionCoordinator {
        FusionCoordinator::new(
            FusionConfig::default(),
            InertialConfig::default(),
            CalibrationBias::default(),
            0,
        )
    }

    #[test]
    fn test_fix_polled_at_interval() {
        let mut fusion = coordinator();
        let mut source = ScriptedPositionSource::default();
        for now in (0..=3_000).step_by(20) {
            fusion.tick(now, &ImuSample::default(), &mut source);
        }
        assert_eq!(source.requests, 4);
    }

    #[test]
    fn test_accepted_fix_reported_directly() {
        let mut fusion = coordinator();
        let mut source = ScriptedPositionSource::new([Ok(fix(35.7, 51.4, 1200.0))]);

        assert_eq!(fusion.tick(0, &ImuSample::default(), &mut source), Some(FixUpdate::Accepted));
        let status = fusion.vehicle_status(250, &Housekeeping::default());
        assert!(!status.is_location_dead_reckoned);
        assert_eq!(status.location_freshness_ms, 250);
        assert_relative_eq!(status.location.y, 35.7f32);
        assert_relative_eq!(status.location.x, 51.4f32);
    }

    #[test]
    fn test_lost_fix_extrapolates_from_last_fix() {
        let mut fusion = coordinator();
        let mut source = ScriptedPositionSource::new([Ok(fix(35.7, 51.4, 1200.0)), Err(TelemetryError::NoFix)]);
        fusion.tick(0, &ImuSample::default(), &mut source);

        let sample = ImuSample {
            linear_accel_g: Vec3::new(0.0, 0.2, 0.0),
            ..ImuSample::default()
        };
        let mut update = None;
        for now in (20..=1_000).step_by(20) {
            update = fusion.tick(now, &sample, &mut source).or(update);
        }
        assert_eq!(update, Some(FixUpdate::Lost));
        assert!(!fusion.is_fix_fresh());
        assert!(fusion.estimator().displacement().y > 0.0);

        let location = fusion.location();
        assert!(location.y > 35.7);
        assert_relative_eq!(location.x, 51.4);

        let status = fusion.vehicle_status(1_000, &Housekeeping::default());
        assert!(status.is_location_dead_reckoned);
        assert_eq!(status.location_freshness_ms, 1_000);
        assert_eq!(fusion.fixes_lost(), 1);
    }

    #[test]
    fn test_new_fix_resets_displacement() {
        let mut fusion = coordinator();
        fusion.estimator_mut().integrate(Vec3::new(1.0, 1.0, 0.0), 1.0);
        assert!(fusion.estimator().displacement().norm() > 0.0);
        fusion.accept_fix(fix(10.0, 20.0, 0.0));
        assert_eq!(fusion.estimator().displacement(), Vec3::zeros());
        assert_eq!(fusion.location(), Vec3::new(20.0, 10.0, 0.0));
    }

    #[test]
    fn test_no_fix_ever_reports_from_origin() {
        let fusion = coordinator();
        let status = fusion.vehicle_status(5_000, &Housekeeping::default());
        assert!(status.is_location_dead_reckoned);
        assert_eq!(status.location_freshness_ms, 5_000);
        assert_eq!(status.location, crate::types::WireVec3::zeros());
        assert_eq!(status.signal_strength_percent, crate::modem::SENTINEL_UNAVAILABLE);
    }

    #[test]
    fn test_freshness_saturates() {
        let mut fusion = coordinator();
        fusion.accept_fix(fix(1.0, 1.0, 0.0));
        assert_eq!(fusion.location_freshness_ms(u64::MAX), u32::MAX);
    }
}
