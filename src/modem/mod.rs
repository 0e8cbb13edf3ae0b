//! Cellular/GNSS modem driven over a serial AT command line.
//!
//! Everything is non-blocking: callers queue queries and call `poll` once per
//! tick. Results land in the housekeeping cache or the pending fix slot.

pub mod command;
pub mod parse;
pub mod sim;

pub use command::{CommandEngine, SerialLine};
pub use sim::SimulatedSerial;

use std::collections::VecDeque;

use log::{debug, error, info, warn};

use crate::config::ModemConfig;
use crate::error::{TelemetryError, TelemetryResult};
use crate::fusion::PositionSource;
use crate::types::{Housekeeping, PositionFix, Timestamp};

/// Cached signal/battery value after a failed query.
pub const SENTINEL_UNAVAILABLE: i8 = -100;

pub const INIT_SEQUENCE: [&str; 5] = ["AT", "AT+CFUN=1", "AT+CGNSPWR=1", "AT+CGPSRST=1", "AT+CLTS=1"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Query {
    /// Step `n` of `INIT_SEQUENCE`.
    Init(usize),
    Clock,
    Fix,
    Signal,
    Battery,
}

impl Query {
    pub fn command(self) -> &'static str {
        match self {
            Query::Init(step) => INIT_SEQUENCE.get(step).copied().unwrap_or("AT"),
            Query::Clock => "AT+CCLK?",
            Query::Fix => "AT+CGNSINF",
            Query::Signal => "AT+CSQ",
            Query::Battery => "AT+CBC",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ModemState {
    Initializing,
    Ready,
    Failed(TelemetryError),
}

pub struct Modem<S: SerialLine> {
    engine: CommandEngine<S>,
    queue: VecDeque<Query>,
    in_flight: Option<Query>,
    state: ModemState,
    housekeeping: Housekeeping,
    fix_result: Option<TelemetryResult<PositionFix>>,
    status_interval_ms: u64,
    last_status_request: Option<u64>,
}

impl<S: SerialLine> Modem<S> {
    /// Queues the init sequence; it runs as `poll` is called.
    pub fn new(line: S, config: &ModemConfig) -> Self {
        Self {
            engine: CommandEngine::new(line, config.command_timeout_ms, config.response_capacity),
            queue: (0..INIT_SEQUENCE.len()).map(Query::Init).collect(),
            in_flight: None,
            state: ModemState::Initializing,
            housekeeping: Housekeeping::default(),
            fix_result: None,
            status_interval_ms: config.status_poll_interval_ms,
            last_status_request: None,
        }
    }

    pub fn state(&self) -> &ModemState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ModemState::Ready
    }

    pub fn housekeeping(&self) -> Housekeeping {
        self.housekeeping
    }

    pub fn line(&self) -> &S {
        self.engine.line()
    }

    pub fn line_mut(&mut self) -> &mut S {
        self.engine.line_mut()
    }

    /// Queue `query` unless it is already waiting. Ignored until ready.
    pub fn enqueue(&mut self, query: Query) {
        if !self.is_ready() {
            return;
        }
        if self.in_flight != Some(query) && !self.queue.contains(&query) {
            self.queue.push_back(query);
        }
    }

    /// Queue clock, signal and battery refreshes if the interval elapsed.
    pub fn request_housekeeping(&mut self, now: u64) -> bool {
        if let Some(last) = self.last_status_request {
            if now.saturating_sub(last) < self.status_interval_ms {
                return false;
            }
        }
        self.last_status_request = Some(now);
        self.enqueue(Query::Clock);
        self.enqueue(Query::Signal);
        self.enqueue(Query::Battery);
        true
    }

    /// Advance the command in flight, then start the next queued one.
    pub fn poll(&mut self, now: u64) {
        if let Some(outcome) = self.engine.poll(now) {
            if let Some(query) = self.in_flight.take() {
                self.complete(query, outcome, now);
            }
        }

        if !self.engine.is_idle() || matches!(self.state, ModemState::Failed(_)) {
            return;
        }
        if let Some(query) = self.queue.pop_front() {
            match self.engine.submit(query.command(), now) {
                Ok(()) => self.in_flight = Some(query),
                Err(e) => self.complete(query, Err(e), now),
            }
        }
    }

    fn complete(&mut self, query: Query, outcome: TelemetryResult<String>, now: u64) {
        match query {
            Query::Init(step) => match outcome {
                Ok(_) if step + 1 == INIT_SEQUENCE.len() => {
                    info!("modem initialised");
                    self.state = ModemState::Ready;
                }
                Ok(_) => debug!("init step {} ok", query.command()),
                Err(e) => {
                    error!("modem init failed at {}: {e}", query.command());
                    self.queue.clear();
                    self.state = ModemState::Failed(TelemetryError::StartupFailed(format!(
                        "{}: {e}",
                        query.command()
                    )));
                }
            },
            Query::Clock => {
                self.housekeeping.time = outcome.and_then(|p| parse::parse_clock(&p)).unwrap_or_else(|e| {
                    warn!("clock query failed: {e}");
                    Timestamp::UNKNOWN
                });
            }
            Query::Signal => {
                self.housekeeping.signal_percent =
                    outcome.and_then(|p| parse::parse_signal(&p)).unwrap_or_else(|e| {
                        warn!("signal query failed: {e}");
                        SENTINEL_UNAVAILABLE
                    });
            }
            Query::Battery => {
                self.housekeeping.battery_percent =
                    outcome.and_then(|p| parse::parse_battery(&p)).unwrap_or_else(|e| {
                        warn!("battery query failed: {e}");
                        SENTINEL_UNAVAILABLE
                    });
            }
            Query::Fix => {
                self.fix_result = Some(outcome.and_then(|p| parse::parse_fix(&p, now)));
            }
        }
    }
}

impl<S: SerialLine> PositionSource for Modem<S> {
    fn request_fix(&mut self, _now: u64) {
        self.enqueue(Query::Fix);
    }

    fn poll_fix(&mut self) -> Option<TelemetryResult<PositionFix>> {
        self.fix_result.take()
    }
}
