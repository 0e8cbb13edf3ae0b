// unit.rs — Top-level scheduler
//
// One `tick(now)` per loop iteration, every collaborator sees the same `now`.
// Startup runs as non-blocking phases; a startup failure parks the unit in
// `Halted` for good.

use log::{error, info, warn};

use crate::config::TelemetryConfig;
use crate::error::TelemetryError;
use crate::fusion::FusionCoordinator;
use crate::inertial::{CalibrationBias, CalibrationProgress, CalibrationSession};
use crate::link::{CycleOutcome, DataTransport, LinkQualityController};
use crate::live_status::LiveStatus;
use crate::modem::{Modem, ModemState, SerialLine};
use crate::sensors::ImuSource;

/// Estimator and link controller, created once startup has finished.
pub struct RunningCore {
    pub fusion: FusionCoordinator,
    pub link: LinkQualityController,
}

pub enum Phase {
    ModemInit,
    Calibrating(CalibrationSession),
    Attaching { deadline: u64, bias: CalibrationBias },
    Running(Box<RunningCore>),
    Halted(TelemetryError),
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::ModemInit => "modem_init",
            Phase::Calibrating(_) => "calibrating",
            Phase::Attaching { .. } => "attaching",
            Phase::Running(_) => "running",
            Phase::Halted(_) => "halted",
        }
    }
}

pub struct TelemetryUnit<I: ImuSource, S: SerialLine, T: DataTransport> {
    config: TelemetryConfig,
    imu: I,
    modem: Modem<S>,
    transport: T,
    phase: Phase,
    started_at: u64,
    last_attach_attempt: Option<u64>,
    last_outcome: Option<CycleOutcome>,
}

impl<I: ImuSource, S: SerialLine, T: DataTransport> TelemetryUnit<I, S, T> {
    pub fn new(config: TelemetryConfig, imu: I, serial: S, transport: T, now: u64) -> Self {
        let modem = Modem::new(serial, &config.modem);
        Self {
            config,
            imu,
            modem,
            transport,
            phase: Phase::ModemInit,
            started_at: now,
            last_attach_attempt: None,
            last_outcome: None,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn is_halted(&self) -> bool {
        matches!(self.phase, Phase::Halted(_))
    }

    pub fn core(&self) -> Option<&RunningCore> {
        match &self.phase {
            Phase::Running(core) => Some(core.as_ref()),
            _ => None,
        }
    }

    pub fn core_mut(&mut self) -> Option<&mut RunningCore> {
        match &mut self.phase {
            Phase::Running(core) => Some(core.as_mut()),
            _ => None,
        }
    }

    pub fn modem(&self) -> &Modem<S> {
        &self.modem
    }

    pub fn modem_mut(&mut self) -> &mut Modem<S> {
        &mut self.modem
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn imu_mut(&mut self) -> &mut I {
        &mut self.imu
    }

    /// What the link controller did on the last running tick.
    pub fn last_outcome(&self) -> Option<CycleOutcome> {
        self.last_outcome
    }

    pub fn tick(&mut self, now: u64) -> &Phase {
        let phase = std::mem::replace(&mut self.phase, Phase::ModemInit);
        let before = phase.name();
        self.phase = match phase {
            Phase::ModemInit => self.init_modem(now),
            Phase::Calibrating(session) => self.calibrate(session, now),
            Phase::Attaching { deadline, bias } => self.attach(now, deadline, bias),
            Phase::Running(core) => self.run(core, now),
            halted @ Phase::Halted(_) => halted,
        };

        let after = self.phase.name();
        if before != after {
            match &self.phase {
                Phase::Halted(reason) => error!("{before} -> halted: {reason}"),
                _ => info!("{before} -> {after} at {} ms", now.saturating_sub(self.started_at)),
            }
        }
        &self.phase
    }

    fn init_modem(&mut self, now: u64) -> Phase {
        self.modem.poll(now);
        match self.modem.state() {
            ModemState::Initializing => Phase::ModemInit,
            ModemState::Ready => Phase::Calibrating(CalibrationSession::new(&self.config.inertial, now)),
            ModemState::Failed(e) => Phase::Halted(e.clone()),
        }
    }

    fn calibrate(&mut self, mut session: CalibrationSession, now: u64) -> Phase {
        let sample = match self.imu.read() {
            Ok(sample) => sample,
            Err(e) => return Phase::Halted(TelemetryError::StartupFailed(format!("calibration: {e}"))),
        };
        match session.feed(now, &sample) {
            Ok(CalibrationProgress::Complete(bias)) => Phase::Attaching {
                deadline: now.saturating_add(self.config.modem.attach_timeout_ms),
                bias,
            },
            Ok(_) => Phase::Calibrating(session),
            Err(e) => Phase::Halted(e),
        }
    }

    fn attach(&mut self, now: u64, deadline: u64, bias: CalibrationBias) -> Phase {
        self.modem.poll(now);
        if self.transport.is_network_attached() {
            let mut link = LinkQualityController::new(&self.config, now);
            if !link.check_connection(now, &mut self.transport) {
                warn!("data channel not up yet, continuing with fallback");
            }
            let fusion = FusionCoordinator::new(
                self.config.fusion.clone(),
                self.config.inertial.clone(),
                bias,
                now,
            );
            return Phase::Running(Box::new(RunningCore { fusion, link }));
        }

        if now >= deadline {
            return Phase::Halted(TelemetryError::StartupFailed(format!(
                "network attach to {} timed out",
                self.config.network.apn
            )));
        }

        let due = self
            .last_attach_attempt
            .is_none_or(|last| now.saturating_sub(last) >= self.config.link.reconnect_interval_ms);
        if due {
            self.last_attach_attempt = Some(now);
            let net = &self.config.network;
            if !self.transport.attach_network(&net.apn, &net.user, &net.password) {
                warn!("network attach to {} failed, retrying", net.apn);
            }
        }
        Phase::Attaching { deadline, bias }
    }

    fn run(&mut self, mut core: Box<RunningCore>, now: u64) -> Phase {
        match self.imu.read() {
            Ok(sample) => {
                core.fusion.tick(now, &sample, &mut self.modem);
            }
            Err(e) => {
                warn!("imu read failed: {e}");
                core.fusion.poll_position(now, &mut self.modem);
            }
        }

        self.modem.poll(now);
        self.modem.request_housekeeping(now);

        let status = core.fusion.vehicle_status(now, &self.modem.housekeeping());
        let outcome = core.link.cycle(now, &status, &mut self.transport);
        if outcome != CycleOutcome::NotDue {
            self.last_outcome = Some(outcome);
        }
        Phase::Running(core)
    }

    /// Health snapshot for the status file.
    pub fn live_status(&self, now: u64) -> LiveStatus {
        let mut status = LiveStatus::new();
        status.uptime_ms = now.saturating_sub(self.started_at);
        status.phase = self.phase.name().to_string();
        let hk = self.modem.housekeeping();
        status.signal_percent = hk.signal_percent;
        status.battery_percent = hk.battery_percent;

        match &self.phase {
            Phase::Calibrating(session) => status.calibration_samples = session.collected(),
            Phase::Halted(reason) => status.halt_reason = Some(reason.to_string()),
            Phase::Running(core) => {
                let stability = core.link.stability();
                status.link_level = stability.level;
                status.consecutive_successes = stability.consecutive_successes;
                status.consecutive_failures = stability.consecutive_failures;
                status.send_interval_ms = core.link.send_interval_ms();
                status.fallback_enabled = core.link.fallback_enabled();
                status.link = core.link.stats().clone();

                let fusion = &core.fusion;
                let location = fusion.location();
                status.dead_reckoned = !fusion.is_fix_fresh();
                status.location_freshness_ms = fusion.location_freshness_ms(now);
                status.longitude = location.x;
                status.latitude = location.y;
                status.altitude = location.z;
                status.speed_mps = fusion.estimator().velocity().norm();
                status.fixes_accepted = fusion.fixes_accepted();
                status.fixes_lost = fusion.fixes_lost();
            }
            Phase::ModemInit | Phase::Attaching { .. } => {}
        }
        status
    }
}
