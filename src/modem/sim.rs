//! In-memory serial line that answers like a cellular/GNSS modem.
//!
//! Responses are generated on `write_line` and handed out `chunk_size`
//! bytes per read so callers see the same fragmentation a UART gives.

use std::collections::VecDeque;

use chrono::Utc;

use super::command::SerialLine;
use crate::error::TelemetryResult;

pub struct SimulatedSerial {
    /// Generate responses for written commands. Off for hand-fed tests.
    pub auto_respond: bool,
    pub echo: bool,
    pub chunk_size: usize,
    /// Commands answered with `ERROR`.
    pub rejected: Vec<String>,
    /// Commands that never get an answer.
    pub silent: Vec<String>,
    /// Fix availability per `AT+CGNSINF`, cycled.
    pub fix_pattern: VecDeque<bool>,
    pub origin: (f64, f64, f64),
    /// Northward drift per reported fix, degrees.
    pub drift_deg: f64,
    pub speed_kmh: f64,
    pub rssi: u8,
    pub charge_status: u8,
    pub charge_level: u8,

    pub written: Vec<String>,
    fixes_reported: u32,
    rx: VecDeque<u8>,
}

impl SimulatedSerial {
    /// Silent line; tests push raw bytes with `push_raw`.
    pub fn scripted() -> Self {
        Self {
            auto_respond: false,
            echo: false,
            chunk_size: 64,
            rejected: Vec::new(),
            silent: Vec::new(),
            fix_pattern: VecDeque::from([true]),
            origin: (35.70, 51.40, 1200.0),
            drift_deg: 0.0001,
            speed_kmh: 36.0,
            rssi: 20,
            charge_status: 1,
            charge_level: 85,
            written: Vec::new(),
            fixes_reported: 0,
            rx: VecDeque::new(),
        }
    }

    /// A modem that accepts everything and always has a fix.
    pub fn responsive() -> Self {
        Self {
            auto_respond: true,
            echo: true,
            chunk_size: 16,
            ..Self::scripted()
        }
    }

    pub fn push_raw(&mut self, text: &str) {
        self.rx.extend(text.bytes());
    }

    pub fn pending_bytes(&self) -> usize {
        self.rx.len()
    }

    fn next_fix_available(&mut self) -> bool {
        match self.fix_pattern.pop_front() {
            Some(available) => {
                self.fix_pattern.push_back(available);
                available
            }
            None => false,
        }
    }

    fn body_for(&mut self, command: &str) -> String {
        match command {
            "AT+CCLK?" => format!("+CCLK: \"{}\"", Utc::now().format("%y/%m/%d,%H:%M:%S+00")),
            "AT+CSQ" => format!("+CSQ: {},0", self.rssi),
            "AT+CBC" => format!("+CBC: {},{},4100", self.charge_status, self.charge_level),
            "AT+CGNSINF" => {
                if self.next_fix_available() {
                    let lat = self.origin.0 + self.drift_deg * f64::from(self.fixes_reported);
                    self.fixes_reported += 1;
                    format!(
                        "+CGNSINF: 1,1,{},{:.6},{:.6},{:.3},{:.2},0.0,1,,0.9,1.2,0.8,,12,9,,,42,,",
                        Utc::now().format("%Y%m%d%H%M%S.000"),
                        lat,
                        self.origin.1,
                        self.origin.2,
                        self.speed_kmh
                    )
                } else {
                    "+CGNSINF: 1,0,,,,,,,0,,,,,,10,0,,,,,".to_string()
                }
            }
            _ => String::new(),
        }
    }
}

impl SerialLine for SimulatedSerial {
    fn write_line(&mut self, line: &str) -> TelemetryResult<()> {
        self.written.push(line.to_string());
        if !self.auto_respond || self.silent.iter().any(|c| c == line) {
            return Ok(());
        }

        let mut reply = String::new();
        if self.echo {
            reply.push_str(line);
            reply.push('\r');
        }
        if self.rejected.iter().any(|c| c == line) {
            reply.push_str("\r\nERROR\r\n");
        } else {
            let body = self.body_for(line);
            if !body.is_empty() {
                reply.push_str("\r\n");
                reply.push_str(&body);
                reply.push_str("\r\n");
            }
            reply.push_str("\r\nOK\r\n");
        }
        self.push_raw(&reply);
        Ok(())
    }

    fn read_available(&mut self, buf: &mut [u8]) -> TelemetryResult<usize> {
        let n = buf.len().min(self.chunk_size).min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::parse::{parse_fix, parse_signal};

    fn drain(serial: &mut SimulatedSerial) -> String {
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            let n = serial.read_available(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_reads_are_chunked() {
        let mut serial = SimulatedSerial::responsive();
        serial.write_line("AT+CSQ").unwrap();
        let total = serial.pending_bytes();
        let mut buf = [0u8; 64];
        assert_eq!(serial.read_available(&mut buf).unwrap(), 16);
        assert_eq!(serial.pending_bytes(), total - 16);
    }

    #[test]
    fn test_generated_fix_parses_and_drifts() {
        let mut serial = SimulatedSerial::responsive();
        serial.write_line("AT+CGNSINF").unwrap();
        let first = parse_fix(&drain(&mut serial), 0).unwrap();
        serial.write_line("AT+CGNSINF").unwrap();
        let second = parse_fix(&drain(&mut serial), 0).unwrap();
        assert!(second.latitude > first.latitude);
    }

    #[test]
    fn test_fix_pattern_and_rejection() {
        let mut serial = SimulatedSerial::responsive();
        serial.fix_pattern = VecDeque::from([false]);
        serial.write_line("AT+CGNSINF").unwrap();
        assert!(parse_fix(&drain(&mut serial), 0).is_err());

        serial.rejected.push("AT+CSQ".into());
        serial.write_line("AT+CSQ").unwrap();
        let reply = drain(&mut serial);
        assert!(reply.ends_with("ERROR\r\n"));
        assert!(parse_signal(&reply).is_err());
    }
}
