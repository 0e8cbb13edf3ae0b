//! Adaptive transmission over a degrading/recovering cellular link.
//!
//! The controller owns the stability level, picks the send cadence and
//! whether the short-message fallback rides along, and runs the staged
//! reconnection of the data channel.

pub mod stability;
pub mod transport;

pub use stability::{LevelChange, LinkStability};
pub use transport::{DataTransport, SimulatedTransport};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::codec::{encode_frame, fallback_message};
use crate::config::{BrokerConfig, FallbackConfig, LinkConfig, NetworkConfig, TelemetryConfig};
use crate::types::VehicleStatus;

/// What one call to `cycle` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Inside the service or send interval; nothing attempted.
    NotDue,
    /// Data channel down: fallback message only, counted as a failure.
    FallbackOnly,
    Published { ack: bool, fallback_sent: bool },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStats {
    pub publishes: u64,
    pub acks: u64,
    pub fallback_messages: u64,
    pub connect_attempts: u64,
}

pub struct LinkQualityController {
    link: LinkConfig,
    network: NetworkConfig,
    broker: BrokerConfig,
    fallback: FallbackConfig,
    stability: LinkStability,
    last_send: u64,
    last_service: Option<u64>,
    last_connect_attempt: Option<u64>,
    last_successful_connect: u64,
    stats: LinkStats,
}

impl LinkQualityController {
    /// `now` starts the first send interval and counts as the last good
    /// connection, so the network is not re-verified immediately.
    pub fn new(config: &TelemetryConfig, now: u64) -> Self {
        Self {
            link: config.link.clone(),
            network: config.network.clone(),
            broker: config.broker.clone(),
            fallback: config.fallback.clone(),
            stability: LinkStability::new(&config.link),
            last_send: now,
            last_service: None,
            last_connect_attempt: None,
            last_successful_connect: now,
            stats: LinkStats::default(),
        }
    }

    pub fn stability(&self) -> &LinkStability {
        &self.stability
    }

    pub fn level(&self) -> usize {
        self.stability.level
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    pub fn send_interval_ms(&self) -> u64 {
        self.link.send_intervals_ms[self.stability.level]
    }

    pub fn fallback_enabled(&self) -> bool {
        self.link.fallback_enabled[self.stability.level]
    }

    pub fn send_due(&self, now: u64) -> bool {
        now.saturating_sub(self.last_send) >= self.send_interval_ms()
    }

    /// Feed one transmission outcome into the stability state machine.
    pub fn adjust(&mut self, success: bool) -> Option<LevelChange> {
        let change = self.stability.adjust(success);
        match change {
            Some(LevelChange::Degraded { from, to }) => warn!(
                "link degraded: level {from} -> {to}, send interval {} ms, fallback {}",
                self.send_interval_ms(),
                self.fallback_enabled()
            ),
            Some(LevelChange::Recovered { from, to }) => info!(
                "link recovered: level {from} -> {to}, send interval {} ms",
                self.send_interval_ms()
            ),
            None => {}
        }
        change
    }

    /// Connection gate run before every send attempt.
    pub fn check_connection<T: DataTransport>(&mut self, now: u64, transport: &mut T) -> bool {
        if transport.is_data_channel_connected() {
            return true;
        }

        if let Some(last) = self.last_connect_attempt {
            if now.saturating_sub(last) < self.link.reconnect_interval_ms {
                return false;
            }
        }
        self.last_connect_attempt = Some(now);

        if now.saturating_sub(self.last_successful_connect) >= self.link.network_reattach_ms
            && !transport.is_network_attached()
        {
            warn!("network detached, re-attaching to {}", self.network.apn);
            if !transport.attach_network(&self.network.apn, &self.network.user, &self.network.password) {
                warn!("network attach failed");
                return false;
            }
        }

        self.stats.connect_attempts += 1;
        if transport.connect_data_channel(&self.broker.endpoint, self.broker.port, &self.broker.client_id) {
            info!("connected to {}:{}", self.broker.endpoint, self.broker.port);
            self.last_successful_connect = now;
            true
        } else {
            warn!(
                "data channel connect to {}:{} failed, retry in {} ms",
                self.broker.endpoint, self.broker.port, self.link.reconnect_interval_ms
            );
            false
        }
    }

    /// Per-tick transmission policy.
    pub fn cycle<T: DataTransport>(
        &mut self,
        now: u64,
        status: &VehicleStatus,
        transport: &mut T,
    ) -> CycleOutcome {
        if let Some(last) = self.last_service {
            if now.saturating_sub(last) < self.link.service_interval_ms {
                return CycleOutcome::NotDue;
            }
        }
        self.last_service = Some(now);
        transport.service();

        if !self.send_due(now) {
            return CycleOutcome::NotDue;
        }
        self.last_send = now;

        if !self.check_connection(now, transport) {
            self.send_fallback(status, transport);
            self.adjust(false);
            return CycleOutcome::FallbackOnly;
        }

        let frame = match encode_frame(status) {
            Ok(frame) => frame,
            Err(e) => {
                error!("frame encoding failed: {e}");
                self.send_fallback(status, transport);
                self.adjust(false);
                return CycleOutcome::FallbackOnly;
            }
        };
        let ack = transport.publish(&self.broker.topic, &frame, self.broker.delivery);
        self.stats.publishes += 1;
        if ack {
            self.stats.acks += 1;
            debug!("frame published to {}", self.broker.topic);
        } else {
            warn!("publish to {} not acknowledged", self.broker.topic);
        }
        self.adjust(ack);

        let fallback_sent = self.fallback_enabled();
        if fallback_sent {
            self.send_fallback(status, transport);
        }
        CycleOutcome::Published { ack, fallback_sent }
    }

    fn send_fallback<T: DataTransport>(&mut self, status: &VehicleStatus, transport: &mut T) {
        let text = fallback_message(status);
        if transport.send_short_message(&self.fallback.destination_number, &text) {
            info!("fallback message sent: {text}");
        } else {
            warn!("fallback message failed: {text}");
        }
        self.stats.fallback_messages += 1;
    }
}
