//! Onboard core of a vehicle telemetry unit.
//!
//! Fuses inertial samples with intermittent satellite fixes into a
//! continuous position/velocity/orientation estimate and delivers it over a
//! cellular link whose cadence adapts to how reliable the link has been.

pub mod codec;
pub mod config;
pub mod error;
pub mod fusion;
pub mod inertial;
pub mod link;
pub mod live_status;
pub mod modem;
pub mod sensors;
pub mod types;
pub mod unit;

pub use config::TelemetryConfig;
pub use error::{TelemetryError, TelemetryResult};
pub use unit::{Phase, TelemetryUnit};
