use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use tokio::time::{interval, Duration, MissedTickBehavior};

use vehicle_telemetry::link::SimulatedTransport;
use vehicle_telemetry::modem::SimulatedSerial;
use vehicle_telemetry::sensors::SimulatedImu;
use vehicle_telemetry::{Phase, TelemetryConfig, TelemetryUnit};

#[derive(Parser, Debug)]
#[command(name = "telemetry_unit")]
#[command(about = "Vehicle telemetry unit: inertial/GNSS fusion with adaptive uplink", long_about = None)]
struct Args {
    /// JSON configuration file (defaults apply when omitted)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Duration in seconds (0 = continuous)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Scheduler tick period in milliseconds
    #[arg(long, default_value = "10")]
    tick_ms: u64,

    /// Write a JSON health snapshot here every few seconds
    #[arg(long, value_name = "FILE")]
    status_file: Option<PathBuf>,

    /// Log filter, overrides RUST_LOG
    #[arg(long)]
    log_level: Option<String>,

    /// Fraction of publishes the simulated link drops (0.0..=1.0)
    #[arg(long, default_value = "0.0")]
    drop_rate: f64,
}

const STATUS_EVERY_MS: u64 = 5_000;

/// Ack pattern with roughly `drop_rate` failures per 20 publishes.
fn ack_pattern(drop_rate: f64) -> Vec<bool> {
    let drops = (drop_rate.clamp(0.0, 1.0) * 20.0).round() as usize;
    (0..20).map(|i| i >= drops).collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env = env_logger::Env::default().default_filter_or("info");
    let mut logger = env_logger::Builder::from_env(env);
    if let Some(level) = &args.log_level {
        logger.parse_filters(level);
    }
    logger.init();

    let config = match &args.config {
        Some(path) => TelemetryConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => TelemetryConfig::default(),
    };
    config.validate().context("invalid configuration")?;

    info!("telemetry unit starting");
    info!("  duration: {} s (0=continuous)", args.duration);
    info!("  broker: {}:{} topic {}", config.broker.endpoint, config.broker.port, config.broker.topic);
    info!("  send intervals: {:?} ms", config.link.send_intervals_ms);

    let transport = if args.drop_rate > 0.0 {
        SimulatedTransport::flaky(&ack_pattern(args.drop_rate))
    } else {
        SimulatedTransport::healthy()
    };
    let mut unit = TelemetryUnit::new(
        config,
        SimulatedImu::default(),
        SimulatedSerial::responsive(),
        transport,
        0,
    );

    let start = Instant::now();
    let mut ticker = interval(Duration::from_millis(args.tick_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_status = 0u64;

    loop {
        ticker.tick().await;
        let now = start.elapsed().as_millis() as u64;

        unit.tick(now);
        if let Phase::Halted(reason) = unit.phase() {
            write_status(&unit, now, args.status_file.as_ref());
            bail!("unit halted: {reason}");
        }

        if now.saturating_sub(last_status) >= STATUS_EVERY_MS {
            last_status = now;
            write_status(&unit, now, args.status_file.as_ref());
        }

        if args.duration > 0 && now >= args.duration * 1000 {
            info!("duration reached, stopping");
            break;
        }
    }

    let status = unit.live_status(start.elapsed().as_millis() as u64);
    info!("=== Final Stats ===");
    info!("phase: {}", status.phase);
    info!("link level: {}", status.link_level);
    info!(
        "publishes: {} (acked {}), fallback messages: {}",
        status.link.publishes, status.link.acks, status.link.fallback_messages
    );
    info!("fixes accepted: {}, lost: {}", status.fixes_accepted, status.fixes_lost);
    write_status(&unit, start.elapsed().as_millis() as u64, args.status_file.as_ref());
    Ok(())
}

fn write_status(
    unit: &TelemetryUnit<SimulatedImu, SimulatedSerial, SimulatedTransport>,
    now: u64,
    path: Option<&PathBuf>,
) {
    let Some(path) = path else { return };
    if let Err(e) = unit.live_status(now).save(path) {
        warn!("failed to write status file {}: {e}", path.display());
    }
}
