//! Boundary to the cellular data / short-message stack.

use std::collections::VecDeque;

use log::debug;

use crate::config::DeliveryGuarantee;

/// Data-channel and short-message operations the link controller drives.
/// Implementations must return promptly; they are called from the tick.
pub trait DataTransport {
    /// Keep-alive housekeeping, called at the service interval.
    fn service(&mut self) {}

    fn is_data_channel_connected(&mut self) -> bool;

    fn connect_data_channel(&mut self, endpoint: &str, port: u16, client_id: &str) -> bool;

    fn is_network_attached(&mut self) -> bool;

    fn attach_network(&mut self, apn: &str, user: &str, password: &str) -> bool;

    /// Returns the acknowledgment for `payload` under `delivery`.
    fn publish(&mut self, topic: &str, payload: &[u8], delivery: DeliveryGuarantee) -> bool;

    fn send_short_message(&mut self, number: &str, text: &str) -> bool;
}

/// In-memory transport with scripted outcomes. Records everything sent.
#[derive(Debug, Default)]
pub struct SimulatedTransport {
    pub network_attached: bool,
    pub connected: bool,
    pub accept_attach: bool,
    pub accept_connect: bool,
    /// Acks handed out in order; `default_ack` once exhausted.
    pub ack_script: VecDeque<bool>,
    pub default_ack: bool,
    /// A failed publish also drops the data channel.
    pub drop_on_nack: bool,

    pub attach_attempts: u32,
    pub connect_attempts: u32,
    pub service_calls: u32,
    pub published: Vec<(String, Vec<u8>)>,
    pub short_messages: Vec<(String, String)>,
}

impl SimulatedTransport {
    /// A healthy link that accepts everything.
    pub fn healthy() -> Self {
        Self {
            network_attached: false,
            connected: false,
            accept_attach: true,
            accept_connect: true,
            default_ack: true,
            ..Self::default()
        }
    }

    /// Cycles through `pattern` for acks forever, dropping the data channel
    /// on every failure.
    pub fn flaky(pattern: &[bool]) -> Self {
        let mut transport = Self::healthy();
        transport.ack_script = pattern.iter().copied().collect();
        transport.drop_on_nack = true;
        transport
    }

    fn next_ack(&mut self) -> bool {
        match self.ack_script.pop_front() {
            Some(ack) => {
                if self.drop_on_nack {
                    // Keep cycling the pattern.
                    self.ack_script.push_back(ack);
                }
                ack
            }
            None => self.default_ack,
        }
    }
}

impl DataTransport for SimulatedTransport {
    fn service(&mut self) {
        self.service_calls += 1;
    }

    fn is_data_channel_connected(&mut self) -> bool {
        self.connected
    }

    fn connect_data_channel(&mut self, endpoint: &str, port: u16, client_id: &str) -> bool {
        self.connect_attempts += 1;
        self.connected = self.accept_connect && self.network_attached;
        debug!(
            "sim connect {client_id}@{endpoint}:{port} -> {}",
            if self.connected { "ok" } else { "refused" }
        );
        self.connected
    }

    fn is_network_attached(&mut self) -> bool {
        self.network_attached
    }

    fn attach_network(&mut self, apn: &str, _user: &str, _password: &str) -> bool {
        self.attach_attempts += 1;
        self.network_attached = self.accept_attach;
        debug!("sim attach apn={apn} -> {}", self.network_attached);
        self.network_attached
    }

    fn publish(&mut self, topic: &str, payload: &[u8], _delivery: DeliveryGuarantee) -> bool {
        if !self.connected {
            return false;
        }
        let ack = self.next_ack();
        if ack {
            self.published.push((topic.to_string(), payload.to_vec()));
        } else if self.drop_on_nack {
            self.connected = false;
        }
        ack
    }

    fn send_short_message(&mut self, number: &str, text: &str) -> bool {
        self.short_messages.push((number.to_string(), text.to_string()));
        true
    }
}
