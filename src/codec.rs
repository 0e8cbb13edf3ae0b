//! Telemetry wire formats.
//!
//! Binary frame, 74 bytes, little-endian:
//!
//! | offset | size | field                      |
//! |--------|------|----------------------------|
//! | 0      | 5    | second, minute, hour, day, month |
//! | 5      | 2    | year                       |
//! | 7      | 12   | acceleration x/y/z (f32)   |
//! | 19     | 12   | velocity x/y/z             |
//! | 31     | 12   | angular velocity x/y/z     |
//! | 43     | 12   | orientation x/y/z          |
//! | 55     | 12   | location lon/lat/alt       |
//! | 67     | 1    | dead-reckoned flag         |
//! | 68     | 4    | location freshness ms (u32)|
//! | 72     | 1    | signal percent (i8)        |
//! | 73     | 1    | battery percent (i8)       |

use crate::error::{TelemetryError, TelemetryResult};
use crate::types::{Timestamp, VehicleStatus, WireVec3};

pub const FRAME_LEN: usize = 74;

/// Marker used in the fallback text when the unit runs on external power.
pub const EXTERNAL_POWER_MARKER: &str = "ADAPTER";

/// Short-message payload limit.
pub const FALLBACK_MAX_LEN: usize = 160;

pub type Frame = [u8; FRAME_LEN];

/// Bounds-checked little-endian writer over a fixed frame.
struct FrameWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> FrameWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put(&mut self, bytes: &[u8]) -> TelemetryResult<()> {
        let end = self.pos + bytes.len();
        let actual = self.buf.len();
        let slot = self
            .buf
            .get_mut(self.pos..end)
            .ok_or(TelemetryError::FrameTruncated { expected: end, actual })?;
        slot.copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    fn u8(&mut self, v: u8) -> TelemetryResult<()> {
        self.put(&[v])
    }

    fn i8(&mut self, v: i8) -> TelemetryResult<()> {
        self.put(&v.to_le_bytes())
    }

    fn u16(&mut self, v: u16) -> TelemetryResult<()> {
        self.put(&v.to_le_bytes())
    }

    fn u32(&mut self, v: u32) -> TelemetryResult<()> {
        self.put(&v.to_le_bytes())
    }

    fn vec3(&mut self, v: &WireVec3) -> TelemetryResult<()> {
        for c in v.iter() {
            self.put(&c.to_le_bytes())?;
        }
        Ok(())
    }
}

/// Bounds-checked little-endian reader.
struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> TelemetryResult<[u8; N]> {
        let end = self.pos + N;
        let bytes = self.buf.get(self.pos..end).ok_or(TelemetryError::FrameTruncated {
            expected: FRAME_LEN,
            actual: self.buf.len(),
        })?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> TelemetryResult<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn i8(&mut self) -> TelemetryResult<i8> {
        Ok(i8::from_le_bytes(self.take::<1>()?))
    }

    fn u16(&mut self) -> TelemetryResult<u16> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    fn u32(&mut self) -> TelemetryResult<u32> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    fn f32(&mut self) -> TelemetryResult<f32> {
        Ok(f32::from_le_bytes(self.take()?))
    }

    fn vec3(&mut self) -> TelemetryResult<WireVec3> {
        Ok(WireVec3::new(self.f32()?, self.f32()?, self.f32()?))
    }
}

pub fn encode_frame(status: &VehicleStatus) -> TelemetryResult<Frame> {
    let mut frame = [0u8; FRAME_LEN];
    write_fields(&mut FrameWriter::new(&mut frame), status)?;
    Ok(frame)
}

fn write_fields(w: &mut FrameWriter<'_>, s: &VehicleStatus) -> TelemetryResult<()> {
    w.u8(s.time.second)?;
    w.u8(s.time.minute)?;
    w.u8(s.time.hour)?;
    w.u8(s.time.day)?;
    w.u8(s.time.month)?;
    w.u16(s.time.year)?;
    w.vec3(&s.acceleration)?;
    w.vec3(&s.velocity)?;
    w.vec3(&s.angular_velocity)?;
    w.vec3(&s.orientation)?;
    w.vec3(&s.location)?;
    w.u8(u8::from(s.is_location_dead_reckoned))?;
    w.u32(s.location_freshness_ms)?;
    w.i8(s.signal_strength_percent)?;
    w.i8(s.battery_percent)?;
    if w.pos != FRAME_LEN {
        return Err(TelemetryError::FrameTruncated { expected: FRAME_LEN, actual: w.pos });
    }
    Ok(())
}

/// Decode a frame. Trailing bytes beyond `FRAME_LEN` are ignored.
pub fn decode_frame(bytes: &[u8]) -> TelemetryResult<VehicleStatus> {
    if bytes.len() < FRAME_LEN {
        return Err(TelemetryError::FrameTruncated {
            expected: FRAME_LEN,
            actual: bytes.len(),
        });
    }
    let mut r = FrameReader::new(bytes);
    let time = Timestamp {
        second: r.u8()?,
        minute: r.u8()?,
        hour: r.u8()?,
        day: r.u8()?,
        month: r.u8()?,
        year: r.u16()?,
    };
    Ok(VehicleStatus {
        time,
        acceleration: r.vec3()?,
        velocity: r.vec3()?,
        angular_velocity: r.vec3()?,
        orientation: r.vec3()?,
        location: r.vec3()?,
        is_location_dead_reckoned: r.u8()? != 0,
        location_freshness_ms: r.u32()?,
        signal_strength_percent: r.i8()?,
        battery_percent: r.i8()?,
    })
}

/// Human-readable single-line summary for the short-message channel.
pub fn fallback_message(status: &VehicleStatus) -> String {
    let t = &status.time;
    let battery = if status.on_external_power() {
        EXTERNAL_POWER_MARKER.to_string()
    } else {
        format!("{}%", status.battery_percent)
    };

    let mut text = format!(
        "[{:02}:{:02}:{:02} {:02}/{:02}/{:04}] Lat:{:.2} Lon:{:.2} Spd:{:.1}m/s Acc:{:.1} Sig:{}% Bat:{}",
        t.hour,
        t.minute,
        t.second,
        t.day,
        t.month,
        t.year,
        status.location.y,
        status.location.x,
        status.speed(),
        status.acceleration_magnitude(),
        status.signal_strength_percent,
        battery,
    );
    // ASCII only, so byte truncation stays on a char boundary.
    text.truncate(FALLBACK_MAX_LEN);
    text
}
