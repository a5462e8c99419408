//! Telemetry snapshot assembly and distribution.
//!
//! The poll loop publishes the full [`TurretData`] after every meaningful
//! update; subscribers receive timestamped copies over a bounded broadcast
//! channel and can lag without ever blocking the scheduler. A second feed
//! carries the command audit trail.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::protocol::{CommandLog, TurretCommand};

/// Capacity of both broadcast feeds. A subscriber further behind than this
/// starts dropping the oldest snapshots.
pub const BROADCAST_CAPACITY: usize = 256;

/// Entries retained in the in-memory command audit ring.
pub const MAX_COMMAND_HISTORY: usize = 64;

/// A pitch/yaw pair in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GimbalAngles {
    pub pitch_deg: f64,
    pub yaw_deg: f64,
}

/// The outgoing command the gimbal is currently acting on, in the IMU
/// relative frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ImuCommand {
    pub pitch_deg: f64,
    pub yaw_deg: f64,
}

/// Active angular rate target. Zero on both axes when not in rate mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RateCommand {
    pub pitch_dps: f64,
    pub yaw_dps: f64,
}

impl RateCommand {
    pub fn is_zero(&self) -> bool {
        self.pitch_dps == 0.0 && self.yaw_dps == 0.0
    }
}

/// The turret subsystem's full observable state, replaced in place on every
/// update and broadcast as a copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TurretData {
    /// Sequence number of the last accepted command.
    pub last_sequence: u32,
    /// Cached outgoing IMU command. `None` means unknown: the next poll
    /// tick must re-read it from the board before rate integration can
    /// resume.
    pub imu_command: Option<ImuCommand>,
    /// Current IMU-reported angles.
    pub imu: GimbalAngles,
    /// Current absolute angles. The gimbal reports no separate absolute
    /// pitch; it mirrors the IMU value.
    pub absolute: GimbalAngles,
    pub rate: RateCommand,
    pub fire_enabled: bool,
    pub agitator_enabled: bool,
    /// Capture time, epoch milliseconds.
    pub timestamp_ms: u64,
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

/// Fan-out point for both outbound feeds: telemetry snapshots and the
/// command audit trail.
#[derive(Debug)]
pub struct TelemetryPublisher {
    telemetry_tx: broadcast::Sender<TurretData>,
    audit_tx: broadcast::Sender<CommandLog>,
    history: Mutex<heapless::Vec<CommandLog, MAX_COMMAND_HISTORY>>,
}

impl TelemetryPublisher {
    pub fn new() -> Self {
        let (telemetry_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (audit_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            telemetry_tx,
            audit_tx,
            history: Mutex::new(heapless::Vec::new()),
        }
    }

    pub fn subscribe_telemetry(&self) -> broadcast::Receiver<TurretData> {
        self.telemetry_tx.subscribe()
    }

    pub fn subscribe_commands(&self) -> broadcast::Receiver<CommandLog> {
        self.audit_tx.subscribe()
    }

    /// Stamp the snapshot with the current wall clock and broadcast a copy.
    /// Having no subscribers is not an error.
    pub fn publish(&self, data: &mut TurretData) {
        data.timestamp_ms = now_ms();
        let _ = self.telemetry_tx.send(*data);
    }

    /// Record a submitted command in the audit ring and broadcast it,
    /// regardless of whether the arbiter goes on to accept it.
    pub fn record_command(&self, command: &TurretCommand) {
        let log = CommandLog {
            timestamp_ms: now_ms(),
            command: *command,
        };
        let mut history = self.history.lock().unwrap();
        if history.is_full() {
            history.remove(0);
        }
        let _ = history.push(log);
        let _ = self.audit_tx.send(log);
    }

    /// The retained audit trail, oldest first.
    pub fn history(&self) -> Vec<CommandLog> {
        self.history.lock().unwrap().iter().copied().collect()
    }
}

impl Default for TelemetryPublisher {
    fn default() -> Self {
        Self::new()
    }
}
