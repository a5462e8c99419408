//! The turret control subsystem.
//!
//! A timer-driven poll loop refreshes cached command and telemetry state
//! from the gimbal and fire control boards once per period, while command
//! submission arbitrates between the three motion modes and writes directly
//! to the bus. Both paths mutate one shared [`TurretData`] behind a mutex;
//! each holds it for its whole critical section, so a submission never
//! interleaves with the middle of a poll tick.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::bus::{BusError, MemRegion, ServoBus};
use crate::protocol::{self, CommandLog, MotionCommand, TurretCommand};
use crate::registers;
use crate::telemetry::{ImuCommand, RateCommand, TelemetryPublisher, TurretData};

/// Runtime configuration. Mutable only through [`Turret::parameters_mut`]
/// before `start`; the poll task captures a copy when it is spawned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameters {
    /// Bus address of the gimbal board.
    pub gimbal_address: u8,
    /// Bus address of the fire control board.
    pub fire_control_address: u8,
    /// Poll period, seconds.
    pub period_s: f64,
    pub min_pitch_deg: f64,
    pub max_pitch_deg: f64,
    pub min_yaw_deg: f64,
    pub max_yaw_deg: f64,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            gimbal_address: 98,
            fire_control_address: 99,
            period_s: 0.1,
            min_pitch_deg: -15.0,
            max_pitch_deg: 10.0,
            min_yaw_deg: -170.0,
            max_yaw_deg: 170.0,
        }
    }
}

impl Parameters {
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(self.period_s)
    }
}

/// The turret subsystem: poll scheduler, command arbiter and telemetry
/// fan-out over one shared bus client.
pub struct Turret<B> {
    bus: Arc<B>,
    params: Parameters,
    shared: Arc<Mutex<TurretData>>,
    publisher: Arc<TelemetryPublisher>,
    stop_tx: watch::Sender<bool>,
}

impl<B: ServoBus + 'static> Turret<B> {
    pub fn new(bus: Arc<B>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            bus,
            params: Parameters::default(),
            shared: Arc::new(Mutex::new(TurretData::default())),
            publisher: Arc::new(TelemetryPublisher::new()),
            stop_tx,
        }
    }

    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    /// Configuration hook for the owning process, meaningful only before
    /// [`Turret::start`]: the poll task runs on a copy taken at spawn time.
    pub fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    /// Telemetry feed: a [`TurretData`] copy after every meaningful update.
    pub fn subscribe_telemetry(&self) -> broadcast::Receiver<TurretData> {
        self.publisher.subscribe_telemetry()
    }

    /// Audit feed: every submitted command, accepted or not.
    pub fn subscribe_commands(&self) -> broadcast::Receiver<CommandLog> {
        self.publisher.subscribe_commands()
    }

    /// Retained command audit trail, oldest first.
    pub fn command_history(&self) -> Vec<CommandLog> {
        self.publisher.history()
    }

    /// Current state snapshot.
    pub async fn data(&self) -> TurretData {
        *self.shared.lock().await
    }

    /// Arm the poll timer. Returns once the loop is scheduled; awaiting the
    /// handle surfaces the fatal bus error if the loop dies. A clean
    /// [`Turret::stop`] or a cancelled bus resolves to `Ok(())`.
    pub fn start(&self) -> JoinHandle<Result<(), BusError>> {
        let bus = Arc::clone(&self.bus);
        let params = self.params.clone();
        let shared = Arc::clone(&self.shared);
        let publisher = Arc::clone(&self.publisher);
        let mut stop_rx = self.stop_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = time::interval(params.period());
            // Under load a tick runs to completion before the next fires;
            // spacing degrades to processing time + period rather than
            // overlapping. This is the accepted jitter model.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(period_s = params.period_s, "turret poll loop started");
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => {
                        info!("turret poll loop stopped");
                        return Ok(());
                    }
                    _ = ticker.tick() => {}
                }
                match poll_tick(bus.as_ref(), &params, &shared, &publisher).await {
                    Ok(()) => {}
                    Err(BusError::Cancelled) => {
                        debug!("bus shut down, turret poll loop exiting");
                        return Ok(());
                    }
                    Err(e) => {
                        error!(error = %e, "turret poll failed");
                        return Err(e);
                    }
                }
            }
        })
    }

    /// Request clean termination of the poll loop. The current tick, if
    /// any, runs to completion first.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Run one poll cycle. The spawned loop calls this on every tick; tests
    /// and alternative schedulers may drive it directly.
    pub async fn poll(&self) -> Result<(), BusError> {
        poll_tick(
            self.bus.as_ref(),
            &self.params,
            &self.shared,
            &self.publisher,
        )
        .await
    }

    /// Submit a command. Invoked independently of the poll period; bus side
    /// effects are issued immediately, one at a time.
    ///
    /// A resubmission with an unchanged sequence number is logged to the
    /// audit feed and otherwise discarded entirely.
    pub async fn submit_command(&self, command: &TurretCommand) -> Result<(), BusError> {
        self.publisher.record_command(command);

        let mut data = self.shared.lock().await;

        if command.sequence == data.last_sequence {
            debug!(
                sequence = command.sequence,
                "repeated command sequence, discarding"
            );
            return Ok(());
        }
        data.last_sequence = command.sequence;

        let params = &self.params;
        match command.motion {
            Some(MotionCommand::Absolute { pitch_deg, yaw_deg }) => {
                // The board translates an absolute move into a new IMU
                // relative baseline, so the cached command is stale until
                // the poll loop re-reads it. Motion also stops by default.
                data.imu_command = None;
                data.rate = RateCommand::default();

                let pitch = pitch_deg.clamp(params.min_pitch_deg, params.max_pitch_deg);
                self.bus
                    .write_int(
                        params.gimbal_address,
                        registers::PITCH_COMMAND,
                        protocol::to_millideg(pitch),
                    )
                    .await?;

                let yaw = yaw_deg.clamp(params.min_yaw_deg, params.max_yaw_deg);
                self.bus
                    .write_int(
                        params.gimbal_address,
                        registers::ABSOLUTE_YAW_COMMAND,
                        protocol::encode_absolute_yaw(yaw),
                    )
                    .await?;
                debug!(sequence = command.sequence, pitch_deg = pitch, yaw_deg = yaw, "absolute command accepted");
            }
            Some(MotionCommand::ImuRelative { pitch_deg, yaw_deg }) => {
                let next = ImuCommand {
                    pitch_deg: pitch_deg.clamp(params.min_pitch_deg, params.max_pitch_deg),
                    yaw_deg,
                };
                data.imu_command = Some(next);
                data.rate = RateCommand::default();

                let frame = protocol::encode_imu_command(next.pitch_deg, next.yaw_deg);
                self.bus
                    .mem_write(
                        MemRegion::Ram,
                        params.gimbal_address,
                        registers::IMU_COMMAND_BLOCK.offset,
                        &frame,
                    )
                    .await?;
                debug!(sequence = command.sequence, "relative command accepted");
            }
            Some(MotionCommand::Rate { pitch_dps, yaw_dps }) => {
                // No bus write here; the poll loop integrates the rate
                // against the cached baseline each tick.
                data.rate = RateCommand { pitch_dps, yaw_dps };
                debug!(sequence = command.sequence, "rate command accepted");
            }
            None => {}
        }

        // Laser state is refreshed on every accepted submission, with or
        // without a motion target.
        let leds = u8::from(command.laser_on) << registers::LASER_BIT;
        self.bus
            .mem_write(
                MemRegion::Ram,
                params.fire_control_address,
                registers::LED_CONTROL.offset,
                &[leds],
            )
            .await?;

        Ok(())
    }
}

/// One poll cycle: four strictly ordered steps, each awaited before the
/// next. A failure in step N skips the remainder of the tick.
async fn poll_tick<B: ServoBus>(
    bus: &B,
    params: &Parameters,
    shared: &Mutex<TurretData>,
    publisher: &TelemetryPublisher,
) -> Result<(), BusError> {
    let mut data = shared.lock().await;

    // Step 1: if the outgoing command is unknown, recover it from the
    // board before anything else can integrate against it.
    if data.imu_command.is_none() {
        let block = bus
            .mem_read(
                MemRegion::Ram,
                params.gimbal_address,
                registers::IMU_COMMAND_BLOCK.offset,
                registers::IMU_COMMAND_BLOCK.length,
            )
            .await?;
        let (pitch_deg, yaw_deg) = protocol::decode_imu_command(&block)?;
        data.imu_command = Some(ImuCommand { pitch_deg, yaw_deg });
        publisher.publish(&mut data);
    }

    // Step 2: rate integration, only with a known baseline.
    if !data.rate.is_zero() {
        if let Some(mut next) = data.imu_command {
            next.pitch_deg += data.rate.pitch_dps * params.period_s;
            next.yaw_deg += data.rate.yaw_dps * params.period_s;
            // Yaw is a continuous axis; only pitch is clamped.
            next.pitch_deg = next.pitch_deg.clamp(params.min_pitch_deg, params.max_pitch_deg);
            data.imu_command = Some(next);

            let frame = protocol::encode_imu_command(next.pitch_deg, next.yaw_deg);
            bus.mem_write(
                MemRegion::Ram,
                params.gimbal_address,
                registers::IMU_COMMAND_BLOCK.offset,
                &frame,
            )
            .await?;
        }
    }

    // Step 3: IMU and absolute telemetry, one combined transfer.
    let block = bus
        .mem_read(
            MemRegion::Ram,
            params.gimbal_address,
            registers::TELEMETRY_BLOCK.offset,
            registers::TELEMETRY_BLOCK.length,
        )
        .await?;
    if block.len() < registers::TELEMETRY_BLOCK.length {
        return Err(BusError::Io(format!(
            "telemetry block short: {} bytes",
            block.len()
        )));
    }
    let (imu_pitch_deg, imu_yaw_deg) = protocol::decode_imu_command(&block[..8])?;
    data.imu.pitch_deg = imu_pitch_deg;
    data.imu.yaw_deg = imu_yaw_deg;
    // No absolute pitch sensor on the gimbal; mirror the IMU reading.
    data.absolute.pitch_deg = data.imu.pitch_deg;
    data.absolute.yaw_deg = protocol::decode_absolute_yaw(&block[8..])?;
    publisher.publish(&mut data);

    // Step 4: fire control flags.
    let block = bus
        .mem_read(
            MemRegion::Ram,
            params.fire_control_address,
            registers::FIRE_PWM.offset,
            registers::FIRE_PWM.length,
        )
        .await?;
    if block.len() < registers::FIRE_PWM.length {
        return Err(BusError::Io(format!(
            "fire control block short: {} bytes",
            block.len()
        )));
    }
    data.fire_enabled = block[0] != 0;
    data.agitator_enabled = block[1] != 0;
    publisher.publish(&mut data);

    Ok(())
}
