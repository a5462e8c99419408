//! Register map for the gimbal and fire control boards.
//!
//! Pure data: each logical register is an address offset plus the number of
//! bytes it occupies on its board. The poll loop and command arbiter never
//! hard-code addresses; everything goes through this table.

use static_assertions::const_assert;

/// One logical register on a bus board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    pub offset: u8,
    pub length: usize,
}

/// Largest single transfer the bus client is asked to perform.
pub const MAX_TRANSFER_SIZE: usize = 16;

// Gimbal board.
pub const PITCH_COMMAND: Register = Register { offset: 0x50, length: 4 };
pub const YAW_COMMAND: Register = Register { offset: 0x54, length: 4 };
pub const ABSOLUTE_YAW_COMMAND: Register = Register { offset: 0x68, length: 2 };
pub const IMU_PITCH: Register = Register { offset: 0x58, length: 4 };
pub const IMU_YAW: Register = Register { offset: 0x5c, length: 4 };
pub const ABSOLUTE_YAW: Register = Register { offset: 0x60, length: 2 };

// Fire control board.
pub const LED_CONTROL: Register = Register { offset: 0x35, length: 1 };
pub const FIRE_PWM: Register = Register { offset: 81, length: 2 };

/// Outgoing pitch+yaw command pair, read and written as one transfer.
pub const IMU_COMMAND_BLOCK: Register = Register {
    offset: PITCH_COMMAND.offset,
    length: PITCH_COMMAND.length + YAW_COMMAND.length,
};

/// IMU pitch, IMU yaw, and absolute yaw telemetry, read as one transfer.
pub const TELEMETRY_BLOCK: Register = Register {
    offset: IMU_PITCH.offset,
    length: IMU_PITCH.length + IMU_YAW.length + ABSOLUTE_YAW.length,
};

/// Bit position of the laser enable flag within [`LED_CONTROL`].
pub const LASER_BIT: u8 = 2;

const_assert!(IMU_COMMAND_BLOCK.length <= MAX_TRANSFER_SIZE);
const_assert!(TELEMETRY_BLOCK.length <= MAX_TRANSFER_SIZE);
const_assert!(FIRE_PWM.length <= MAX_TRANSFER_SIZE);
