use approx::{assert_abs_diff_eq, assert_relative_eq};

use vehicle_telemetry::codec::{decode_frame, encode_frame, fallback_message, FRAME_LEN};
use vehicle_telemetry::config::{FusionConfig, InertialConfig};
use vehicle_telemetry::fusion::{FixUpdate, FusionCoordinator, ScriptedPositionSource};
use vehicle_telemetry::inertial::CalibrationBias;
use vehicle_telemetry::link::{CycleOutcome, LinkQualityController, SimulatedTransport};
use vehicle_telemetry::modem::SimulatedSerial;
use vehicle_telemetry::sensors::SimulatedImu;
use vehicle_telemetry::types::{Housekeeping, ImuSample, PositionFix, Timestamp, Vec3, EARTH_RADIUS_M};
use vehicle_telemetry::{TelemetryConfig, TelemetryUnit};

fn tehran_fix() -> PositionFix {
    PositionFix {
        latitude: 35.70,
        longitude: 51.40,
        altitude: 1200.0,
        satellites: 9,
        valid: true,
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
fn dead_reckoning_two_seconds_after_fix() {
    let mut fusion = coordinator();
    let mut source = ScriptedPositionSource::new([Ok(tehran_fix())]);
    assert_eq!(
        fusion.tick(0, &ImuSample::default(), &mut source),
        Some(FixUpdate::Accepted)
    );

    for _ in 0..100 {
        fusion.estimator_mut().integrate(Vec3::new(0.0, 1.0, 0.0), 0.02);
    }
    // The scripted source has nothing left: the next poll loses the fix.
    assert_eq!(fusion.poll_position(1_000, &mut source), Some(FixUpdate::Lost));

    let estimator = fusion.estimator();
    assert_abs_diff_eq!(estimator.displacement().y, 2.0, epsilon = 1e-9);
    assert_abs_diff_eq!(estimator.velocity().y, 2.0, epsilon = 1e-9);

    let location = fusion.location();
    let expected_lat = 35.70 + (2.0 / EARTH_RADIUS_M) * (180.0 / std::f64::consts::PI);
    assert_relative_eq!(location.y, expected_lat, epsilon = 1e-9);
    assert_relative_eq!(location.x, 51.40, epsilon = 1e-12);
    assert_relative_eq!(location.z, 1200.0, epsilon = 1e-12);

    let status = fusion.vehicle_status(1_500, &Housekeeping::default());
    assert!(status.is_location_dead_reckoned);
    assert_eq!(status.location_freshness_ms, 1_500);
}

#[test]
fn zero_displacement_reports_reference_point() {
    let mut fusion = coordinator();
    fusion.estimator_mut().integrate(Vec3::new(3.0, -2.0, 0.5), 1.0);
    fusion.estimator_mut().reset_displacement();
    let location = fusion.estimator().new_location(51.40, 35.70, 1200.0);
    assert_eq!(location, Vec3::new(51.40, 35.70, 1200.0));
}

#[test]
fn five_failures_then_disconnect_reach_level_two() {
    let config = TelemetryConfig::default();
    let mut link = LinkQualityController::new(&config, 0);
    let mut transport = SimulatedTransport::healthy();
    transport.network_attached = true;
    transport.connected = true;
    transport.default_ack = false;

    let status = coordinator().vehicle_status(0, &Housekeeping::default());
    let mut now = 0;
    for _ in 0..5 {
        now += link.send_interval_ms();
        assert_eq!(
            link.cycle(now, &status, &mut transport),
            CycleOutcome::Published { ack: false, fallback_sent: false }
        );
    }
    assert_eq!(link.level(), 1);
    assert_eq!(link.stability().consecutive_failures, 2);

    // Link drops and will not come back.
    transport.connected = false;
    transport.accept_connect = false;
    now += link.send_interval_ms();
    assert_eq!(link.cycle(now, &status, &mut transport), CycleOutcome::FallbackOnly);

    assert_eq!(link.level(), 2);
    assert!(!link.stability().is_worst());
    assert!(!link.fallback_enabled());
    assert_eq!(link.send_interval_ms(), config.link.send_intervals_ms[2]);
}

#[test]
fn reconnect_attempts_are_rate_limited() {
    let mut link = LinkQualityController::new(&TelemetryConfig::default(), 0);
    let mut transport = SimulatedTransport::healthy();
    transport.network_attached = true;
    transport.accept_connect = false;

    assert!(!link.check_connection(100, &mut transport));
    assert!(!link.check_connection(4_000, &mut transport));
    assert_eq!(transport.connect_attempts, 1);
}

#[test]
fn fused_status_survives_the_wire() {
    let mut fusion = coordinator();
    let mut source = ScriptedPositionSource::new([Ok(tehran_fix())]);
    fusion.tick(0, &ImuSample::default(), &mut source);

    let sample = ImuSample {
        linear_accel_g: Vec3::new(0.02, 0.1, -0.01),
        gyro: Vec3::new(0.01, 0.0, -0.03),
        roll_deg: 2.0,
        pitch_deg: -1.0,
        yaw_deg: 270.0,
    };
    for now in (20..=2_000).step_by(20) {
        fusion.tick(now, &sample, &mut source);
    }

    let housekeeping = Housekeeping {
        time: Timestamp { second: 1, minute: 2, hour: 3, day: 4, month: 5, year: 2025 },
        signal_percent: 64,
        battery_percent: -1,
    };
    let status = fusion.vehicle_status(2_000, &housekeeping);
    let frame = encode_frame(&status).unwrap();
    assert_eq!(frame.len(), FRAME_LEN);
    assert_eq!(decode_frame(&frame).unwrap(), status);

    let text = fallback_message(&status);
    assert!(text.contains("Bat:ADAPTER"));
    assert!(text.contains("Sig:64%"));
}

#[test]
fn unit_on_dead_link_falls_back_at_worst_level() {
    let mut config = TelemetryConfig::default();
    config.inertial.calibration_settle_ms = 100;
    config.inertial.calibration_window_ms = 1_000;
    config.inertial.min_calibration_samples = 20;
    config.link.send_intervals_ms = vec![1_000, 2_000, 3_000, 4_000];

    let mut transport = SimulatedTransport::healthy();
    transport.accept_connect = false;

    let mut unit = TelemetryUnit::new(
        config,
        SimulatedImu::at_rest(),
        SimulatedSerial::responsive(),
        transport,
        0,
    );
    for now in (0..40_000).step_by(20) {
        unit.tick(now);
    }

    let core = unit.core().expect("unit should be running");
    assert!(core.link.stability().is_worst());
    assert!(core.link.fallback_enabled());
    assert_eq!(unit.last_outcome(), Some(CycleOutcome::FallbackOnly));
    assert!(unit.transport().published.is_empty());
    assert!(unit.transport().short_messages.len() >= 9);

    let status = unit.live_status(40_000);
    assert_eq!(status.link_level, 3);
    assert!(status.link.fallback_messages >= 9);
}
