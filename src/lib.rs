//! # Turret Bus Controller
//!
//! Control subsystem for a two-axis turret gimbal and an attached fire
//! control board sharing one actuator register bus. A periodic poll loop
//! refreshes cached command and telemetry state, a command arbiter resolves
//! each submission into exactly one motion mode, and decoded snapshots fan
//! out to passive subscribers.
//!
//! ## Features
//!
//! - **Periodic polling**: timer-driven read sequence with strict per-tick
//!   step ordering and a fail-fast bus error posture
//! - **Command arbitration**: absolute, IMU-relative and rate modes with
//!   clamping, sequence deduplication and cache invalidation
//! - **Wire codec**: 7-bit-per-byte register packing for millidegree angles
//!   and the 14-bit absolute yaw code
//! - **Telemetry fan-out**: bounded broadcast feeds for state snapshots and
//!   the command audit trail
//! - **Simulated boards**: an in-memory bus for tests and the simulator
//!   binary
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use turretbus::{MotionCommand, SimServoBus, Turret, TurretCommand};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = Arc::new(SimServoBus::new());
//! let turret = Turret::new(Arc::clone(&bus));
//!
//! let handle = turret.start();
//!
//! turret
//!     .submit_command(&TurretCommand {
//!         sequence: 1,
//!         motion: Some(MotionCommand::Absolute {
//!             pitch_deg: 5.0,
//!             yaw_deg: 45.0,
//!         }),
//!         laser_on: false,
//!     })
//!     .await
//!     .expect("bus write failed");
//!
//! turret.stop();
//! let _ = handle.await;
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - wire codec and command/audit record types
//! - [`registers`] - register map for both boards
//! - [`bus`] - the bus client boundary and the simulated implementation
//! - [`turret`] - poll scheduler and command arbiter
//! - [`telemetry`] - snapshot type and broadcast fan-out

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod bus;
pub mod protocol;
pub mod registers;
pub mod telemetry;
pub mod turret;

// Re-export the main public types for convenience.
pub use bus::{BusError, MemRegion, RegisterBlock, ServoBus, SimServoBus};
pub use protocol::{CommandLog, MotionCommand, ProtocolError, TurretCommand};
pub use telemetry::{GimbalAngles, ImuCommand, RateCommand, TurretData};
pub use turret::{Parameters, Turret};
