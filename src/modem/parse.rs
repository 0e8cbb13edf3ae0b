//! Payload parsers for the positioning modem's query responses.
//!
//! Inputs are payloads already stripped of the `OK` marker and line breaks.

use std::str::FromStr;

use crate::error::{TelemetryError, TelemetryResult};
use crate::types::{PositionFix, Timestamp};

const KMH_TO_MPS: f64 = 1.0 / 3.6;

fn after<'a>(payload: &'a str, prefix: &str) -> TelemetryResult<&'a str> {
    payload
        .find(prefix)
        .map(|i| &payload[i + prefix.len()..])
        .ok_or_else(|| TelemetryError::MalformedResponse(format!("missing `{prefix}` in {payload:?}")))
}

fn number<T: FromStr>(text: &str, what: &str) -> TelemetryResult<T> {
    text.trim()
        .parse()
        .map_err(|_| TelemetryError::MalformedResponse(format!("bad {what}: {text:?}")))
}

fn part(parts: &[&str], i: usize, what: &str) -> TelemetryResult<u8> {
    number(parts.get(i).copied().unwrap_or(""), what)
}

/// `+CCLK: "yy/MM/dd,hh:mm:ss±zz"`
pub fn parse_clock(payload: &str) -> TelemetryResult<Timestamp> {
    let body = after(payload, "+CCLK: \"")?;
    let (date, time) = body
        .split_once(',')
        .ok_or_else(|| TelemetryError::MalformedResponse(format!("bad clock: {body:?}")))?;

    let d: Vec<&str> = date.split('/').collect();
    let t: Vec<&str> = time.get(..8).unwrap_or(time).split(':').collect();

    let yy = part(&d, 0, "year")?;
    let month = part(&d, 1, "month")?;
    let day = part(&d, 2, "day")?;
    let hour = part(&t, 0, "hour")?;
    let minute = part(&t, 1, "minute")?;
    let second = part(&t, 2, "second")?;

    Ok(Timestamp {
        second,
        minute,
        hour,
        day,
        month,
        year: 2000 + u16::from(yy),
    })
}

/// `+CGNSINF: run,fix,utc,lat,lon,alt,speed_kmh,course,mode,,hdop,pdop,vdop,,in_view,used,...`
///
/// Empty fields are kept so indices stay aligned with the modem's layout.
pub fn parse_fix(payload: &str, captured_at: u64) -> TelemetryResult<PositionFix> {
    let body = after(payload, "+CGNSINF:")?;
    let fields: Vec<&str> = body.split(',').map(str::trim).collect();

    let run = fields.first().copied().unwrap_or("");
    let fix = fields.get(1).copied().unwrap_or("");
    if run != "1" || fix != "1" {
        return Err(TelemetryError::NoFix);
    }

    let required = |i: usize, what: &str| -> TelemetryResult<f64> {
        number(fields.get(i).copied().unwrap_or(""), what)
    };
    let optional = |i: usize| -> f64 {
        fields.get(i).and_then(|s| s.parse().ok()).unwrap_or(0.0)
    };

    Ok(PositionFix {
        latitude: required(3, "latitude")?,
        longitude: required(4, "longitude")?,
        altitude: required(5, "altitude")?,
        speed_mps: optional(6) * KMH_TO_MPS,
        heading_deg: optional(7),
        satellites: fields.get(15).and_then(|s| s.parse().ok()).unwrap_or(0),
        captured_at,
        valid: true,
    })
}

/// `+CSQ: rssi,ber` as a 0..=100 percentage; rssi 99 ("unknown") maps to 0.
/// Out-of-range readings saturate at 100.
pub fn parse_signal(payload: &str) -> TelemetryResult<i8> {
    let body = after(payload, "+CSQ:")?;
    let rssi: u32 = number(body.split(',').next().unwrap_or(""), "rssi")?;
    if rssi == 99 {
        return Ok(0);
    }
    let percent = rssi.min(31) * 100 / 31;
    Ok(percent as i8)
}

/// `+CBC: bcs,bcl,mV`; charge status 0 means externally powered (-1).
pub fn parse_battery(payload: &str) -> TelemetryResult<i8> {
    let body = after(payload, "+CBC:")?;
    let mut parts = body.split(',');
    let status: u8 = number(parts.next().unwrap_or(""), "charge status")?;
    let level: u8 = number(parts.next().unwrap_or(""), "charge level")?;
    if status == 0 {
        return Ok(-1);
    }
    Ok(level.min(100) as i8)
}
