//! Wire protocol for the gimbal and fire control boards.
//!
//! Register values travel as 7-bit groups, least significant group first,
//! one group per byte in that byte's low seven bits. Angles are exchanged
//! with callers as floating point degrees; on the wire they are
//! millidegree-scaled integers, truncated toward zero, except the absolute
//! yaw register which carries a 14-bit code with its own scaling.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire scale for angle registers: millidegrees per degree.
pub const MILLIDEG_PER_DEG: f64 = 1000.0;

/// Full-scale code of the absolute yaw register.
pub const ABSOLUTE_YAW_FULL_SCALE: i32 = 0x3fff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("register payload too short: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },
}

/// Degrees to on-wire millidegrees, truncated toward zero.
pub fn to_millideg(deg: f64) -> i32 {
    (deg * MILLIDEG_PER_DEG) as i32
}

/// On-wire millidegrees back to degrees.
pub fn from_millideg(raw: i32) -> f64 {
    f64::from(raw) / MILLIDEG_PER_DEG
}

/// Split a 28-bit two's-complement value into four 7-bit groups, least
/// significant group first.
pub fn encode_signed_28(value: i32) -> [u8; 4] {
    [
        (value & 0x7f) as u8,
        ((value >> 7) & 0x7f) as u8,
        ((value >> 14) & 0x7f) as u8,
        ((value >> 21) & 0x7f) as u8,
    ]
}

/// Reassemble a 28-bit value from four 7-bit groups and restore the
/// two's-complement sign.
pub fn decode_signed_28(bytes: &[u8]) -> Result<i32, ProtocolError> {
    if bytes.len() < 4 {
        return Err(ProtocolError::ShortRead {
            expected: 4,
            actual: bytes.len(),
        });
    }
    let unextended = u32::from(bytes[0])
        | u32::from(bytes[1]) << 7
        | u32::from(bytes[2]) << 14
        | u32::from(bytes[3]) << 21;
    if unextended >= 0x800_0000 {
        Ok((i64::from(unextended) - (0x80i64 << 21)) as i32)
    } else {
        Ok(unextended as i32)
    }
}

/// Encode a pitch/yaw pair into the 8-byte outgoing command block: pitch
/// millidegrees in the first four bytes, yaw millidegrees in the last four.
pub fn encode_imu_command(pitch_deg: f64, yaw_deg: f64) -> [u8; 8] {
    let pitch = encode_signed_28(to_millideg(pitch_deg));
    let yaw = encode_signed_28(to_millideg(yaw_deg));
    [
        pitch[0], pitch[1], pitch[2], pitch[3], yaw[0], yaw[1], yaw[2], yaw[3],
    ]
}

/// Decode the 8-byte command block into `(pitch_deg, yaw_deg)`.
pub fn decode_imu_command(bytes: &[u8]) -> Result<(f64, f64), ProtocolError> {
    if bytes.len() < 8 {
        return Err(ProtocolError::ShortRead {
            expected: 8,
            actual: bytes.len(),
        });
    }
    let pitch_deg = from_millideg(decode_signed_28(&bytes[0..4])?);
    let yaw_deg = from_millideg(decode_signed_28(&bytes[4..8])?);
    Ok((pitch_deg, yaw_deg))
}

/// Decode the 14-bit absolute yaw telemetry code.
///
/// The inbound scaling here and the outbound scaling in
/// [`encode_absolute_yaw`] use different factor pairs. That asymmetry
/// matches the deployed firmware; round-tripping a value through both
/// paths does not recover it. See the round-trip test pinning both sides.
pub fn decode_absolute_yaw(bytes: &[u8]) -> Result<f64, ProtocolError> {
    if bytes.len() < 2 {
        return Err(ProtocolError::ShortRead {
            expected: 2,
            actual: bytes.len(),
        });
    }
    let code = i32::from(bytes[0]) | i32::from(bytes[1]) << 7;
    Ok(f64::from(code - ABSOLUTE_YAW_FULL_SCALE) / (f64::from(0x7fff) * 360.0))
}

/// Encode an absolute yaw angle into the 14-bit outbound code, clamped to
/// the register's range.
pub fn encode_absolute_yaw(yaw_deg: f64) -> i32 {
    let raw = (yaw_deg / f64::from(ABSOLUTE_YAW_FULL_SCALE) * 360.0 + f64::from(0x1fff)) as i32;
    raw.clamp(0, ABSOLUTE_YAW_FULL_SCALE)
}

/// One of the three mutually exclusive motion modes a command may request.
///
/// The variants are ordered by arbitration precedence: an `Absolute` target
/// always wins, `ImuRelative` applies only when no absolute target is
/// present, and `Rate` only when neither of the others is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MotionCommand {
    /// Move to an absolute pitch/yaw, in degrees.
    Absolute { pitch_deg: f64, yaw_deg: f64 },
    /// Move to a pitch/yaw relative to the IMU frame, in degrees.
    ImuRelative { pitch_deg: f64, yaw_deg: f64 },
    /// Sweep at a fixed angular rate, in degrees per second.
    Rate { pitch_dps: f64, yaw_dps: f64 },
}

/// A command submitted to the turret subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TurretCommand {
    /// Caller-supplied, monotonically increasing. A resubmission with an
    /// unchanged sequence is discarded entirely.
    pub sequence: u32,
    pub motion: Option<MotionCommand>,
    pub laser_on: bool,
}

/// Audit record emitted for every submitted command, accepted or not.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommandLog {
    pub timestamp_ms: u64,
    pub command: TurretCommand,
}
