//! Non-blocking AT command engine.
//!
//! One command is outstanding at a time. `poll` drains whatever bytes the
//! line has buffered and never waits; a response is complete when a line
//! ends in `OK\r\n` or `ERROR\r\n`.

use log::{debug, trace};

use crate::error::{TelemetryError, TelemetryResult};

const OK_MARKER: &[u8] = b"OK\r\n";
const ERROR_MARKER: &[u8] = b"ERROR\r\n";

/// Byte-level serial link to the modem.
pub trait SerialLine {
    /// Write `line` followed by a carriage return.
    fn write_line(&mut self, line: &str) -> TelemetryResult<()>;

    /// Copy up to `buf.len()` buffered bytes into `buf` without blocking.
    /// Returns 0 when nothing is pending.
    fn read_available(&mut self, buf: &mut [u8]) -> TelemetryResult<usize>;
}

struct Pending {
    command: String,
    started_at: u64,
    response: Vec<u8>,
}

enum Completion {
    Ok,
    Rejected,
    Overflow,
    Failed(TelemetryError),
}

/// `marker` occupies the whole last line of `buf`.
fn ends_with_line(buf: &[u8], marker: &[u8]) -> bool {
    buf.ends_with(marker)
        && (buf.len() == marker.len() || buf[buf.len() - marker.len() - 1] == b'\n')
}

pub struct CommandEngine<S: SerialLine> {
    line: S,
    timeout_ms: u64,
    capacity: usize,
    pending: Option<Pending>,
}

impl<S: SerialLine> CommandEngine<S> {
    pub fn new(line: S, timeout_ms: u64, capacity: usize) -> Self {
        Self {
            line,
            timeout_ms,
            capacity: capacity.max(OK_MARKER.len()),
            pending: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_none()
    }

    pub fn line(&self) -> &S {
        &self.line
    }

    pub fn line_mut(&mut self) -> &mut S {
        &mut self.line
    }

    /// Send `command`. Stale input left over from earlier exchanges is
    /// discarded first so it cannot be mistaken for this response.
    pub fn submit(&mut self, command: &str, now: u64) -> TelemetryResult<()> {
        if let Some(pending) = &self.pending {
            return Err(TelemetryError::ModemBusy(pending.command.clone()));
        }

        let mut scratch = [0u8; 64];
        let mut discarded = 0;
        loop {
            match self.line.read_available(&mut scratch)? {
                0 => break,
                n => discarded += n,
            }
        }
        if discarded > 0 {
            trace!("discarded {discarded} stale bytes before {command}");
        }

        self.line.write_line(command)?;
        debug!("-> {command}");
        self.pending = Some(Pending {
            command: command.to_string(),
            started_at: now,
            response: Vec::with_capacity(self.capacity),
        });
        Ok(())
    }

    /// Advance the outstanding command. `None` while idle or still waiting.
    ///
    /// Bytes that arrive after the terminator in the same read are dropped.
    pub fn poll(&mut self, now: u64) -> Option<TelemetryResult<String>> {
        let pending = self.pending.as_mut()?;

        let mut chunk = [0u8; 64];
        let mut completion = None;
        'read: loop {
            let n = match self.line.read_available(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    completion = Some(Completion::Failed(e));
                    break;
                }
            };
            for &byte in &chunk[..n] {
                if pending.response.len() >= self.capacity {
                    completion = Some(Completion::Overflow);
                    break 'read;
                }
                pending.response.push(byte);
                if byte != b'\n' {
                    continue;
                }
                if ends_with_line(&pending.response, OK_MARKER) {
                    completion = Some(Completion::Ok);
                    break 'read;
                }
                if ends_with_line(&pending.response, ERROR_MARKER) {
                    completion = Some(Completion::Rejected);
                    break 'read;
                }
            }
        }

        let outcome = match completion {
            Some(Completion::Ok) => {
                let end = pending.response.len() - OK_MARKER.len();
                Ok(clean_payload(&pending.response[..end]))
            }
            Some(Completion::Rejected) => {
                let end = pending.response.len() - ERROR_MARKER.len();
                Err(TelemetryError::CommandRejected {
                    command: pending.command.clone(),
                    response: clean_payload(&pending.response[..end]),
                })
            }
            Some(Completion::Overflow) => Err(TelemetryError::MalformedResponse(format!(
                "{} response exceeded {} bytes",
                pending.command, self.capacity
            ))),
            Some(Completion::Failed(e)) => Err(e),
            None if now.saturating_sub(pending.started_at) >= self.timeout_ms => {
                Err(TelemetryError::CommandTimeout(pending.command.clone()))
            }
            None => return None,
        };

        if let Ok(payload) = &outcome {
            debug!("<- {} {payload:?}", pending.command);
        }
        self.pending = None;
        Some(outcome)
    }
}

/// Drop line breaks; the remaining text is what the parsers search.
fn clean_payload(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .filter(|c| *c != '\r' && *c != '\n')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::sim::SimulatedSerial;

    fn engine(serial: SimulatedSerial) -> CommandEngine<SimulatedSerial> {
        CommandEngine::new(serial, 5_000, 256)
    }

    #[test]
    fn test_response_split_across_polls() {
        let mut serial = SimulatedSerial::scripted();
        serial.chunk_size = 4;
        let mut e = engine(serial);

        e.submit("AT+CSQ", 0).unwrap();
        e.line_mut().push_raw("AT+CSQ\r\r\n+CSQ: 20,0\r\n\r\nOK\r\n");
        // Each read returns 4 bytes but poll drains until empty.
        let out = e.poll(10).unwrap().unwrap();
        assert!(out.contains("+CSQ: 20,0"));
        assert!(!out.contains("OK"));
        assert!(e.is_idle());
    }

    #[test]
    fn test_waits_for_terminator() {
        let mut e = engine(SimulatedSerial::scripted());
        e.submit("AT+CBC", 0).unwrap();
        e.line_mut().push_raw("+CBC: 1,85,4100\r\n");
        assert!(e.poll(10).is_none());
        e.line_mut().push_raw("\r\nOK\r\n");
        assert_eq!(e.poll(20), Some(Ok("+CBC: 1,85,4100".to_string())));
    }

    #[test]
    fn test_error_terminator_rejects() {
        let mut e = engine(SimulatedSerial::scripted());
        e.submit("AT+CGNSPWR=1", 0).unwrap();
        e.line_mut().push_raw("\r\nERROR\r\n");
        assert_eq!(
            e.poll(1),
            Some(Err(TelemetryError::CommandRejected {
                command: "AT+CGNSPWR=1".into(),
                response: String::new(),
            }))
        );
    }

    #[test]
    fn test_ok_inside_payload_is_not_a_terminator() {
        let mut e = engine(SimulatedSerial::scripted());
        e.submit("AT+X", 0).unwrap();
        e.line_mut().push_raw("BOOK\r\n");
        assert!(e.poll(1).is_none());
        e.line_mut().push_raw("OK\r\n");
        assert_eq!(e.poll(2), Some(Ok("BOOK".to_string())));
    }

    #[test]
    fn test_timeout() {
        let mut e = engine(SimulatedSerial::scripted());
        e.submit("AT", 100).unwrap();
        assert!(e.poll(5_099).is_none());
        assert_eq!(e.poll(5_100), Some(Err(TelemetryError::CommandTimeout("AT".into()))));
        assert!(e.is_idle());
    }

    #[test]
    fn test_busy_while_outstanding() {
        let mut e = engine(SimulatedSerial::scripted());
        e.submit("AT", 0).unwrap();
        assert_eq!(e.submit("AT+CSQ", 1), Err(TelemetryError::ModemBusy("AT".into())));
    }

    #[test]
    fn test_overflow_is_malformed() {
        let mut e = CommandEngine::new(SimulatedSerial::scripted(), 5_000, 8);
        e.submit("AT", 0).unwrap();
        e.line_mut().push_raw("0123456789\r\nOK\r\n");
        assert!(matches!(e.poll(1), Some(Err(TelemetryError::MalformedResponse(_)))));
    }

    #[test]
    fn test_stale_input_discarded_on_submit() {
        let mut e = engine(SimulatedSerial::scripted());
        e.line_mut().push_raw("\r\nOK\r\n");
        e.submit("AT+CSQ", 0).unwrap();
        assert!(e.poll(1).is_none());
    }

    #[test]
    fn test_idle_poll_is_none() {
        let mut e = engine(SimulatedSerial::scripted());
        assert!(e.poll(0).is_none());
    }
}
