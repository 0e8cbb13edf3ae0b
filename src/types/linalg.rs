//! Vector aliases and physical constants shared by the estimator and codec.
//!
//! Integration runs in `f64`; the wire frame carries `f32`.

use nalgebra::Vector3;

/// Working precision for inertial integration.
pub type Vec3 = Vector3<f64>;

/// Wire precision (IEEE-754 single) for the telemetry frame.
pub type WireVec3 = Vector3<f32>;

/// Standard gravity, m/s².
pub const STANDARD_GRAVITY: f64 = 9.806_65;

/// Mean Earth radius used by the flat-Earth projection, meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;
