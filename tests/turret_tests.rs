//! Integration tests driving the turret control loop against simulated
//! gimbal and fire control boards.

use std::sync::Arc;
use std::time::Duration;

use turretbus::protocol::{self, MotionCommand, TurretCommand};
use turretbus::registers;
use turretbus::{BusError, Parameters, SimServoBus, Turret};

fn make_turret(
    configure: impl FnOnce(&mut Parameters),
) -> (Arc<SimServoBus>, Turret<SimServoBus>) {
    let bus = Arc::new(SimServoBus::new());
    let mut turret = Turret::new(Arc::clone(&bus));
    configure(turret.parameters_mut());
    (bus, turret)
}

fn command(sequence: u32, motion: Option<MotionCommand>, laser_on: bool) -> TurretCommand {
    TurretCommand {
        sequence,
        motion,
        laser_on,
    }
}

fn gimbal_command_block(bus: &SimServoBus, gimbal: u8) -> (f64, f64) {
    let regs = bus.registers(
        gimbal,
        registers::IMU_COMMAND_BLOCK.offset,
        registers::IMU_COMMAND_BLOCK.length,
    );
    protocol::decode_imu_command(&regs).unwrap()
}

#[tokio::test]
async fn laser_flag_lands_in_bit_two() {
    let (bus, turret) = make_turret(|_| {});
    let fire_control = turret.parameters().fire_control_address;

    turret.submit_command(&command(1, None, true)).await.unwrap();
    assert_eq!(
        bus.registers(fire_control, registers::LED_CONTROL.offset, 1),
        vec![0b100]
    );

    turret.submit_command(&command(2, None, false)).await.unwrap();
    assert_eq!(
        bus.registers(fire_control, registers::LED_CONTROL.offset, 1),
        vec![0]
    );
}

#[tokio::test]
async fn duplicate_sequence_is_discarded_entirely() {
    let (bus, turret) = make_turret(|_| {});
    let fire_control = turret.parameters().fire_control_address;

    turret.submit_command(&command(1, None, true)).await.unwrap();
    let writes_after_first = bus.write_count();

    // Same sequence, different laser state: audit only, no bus traffic,
    // not even the laser refresh.
    turret.submit_command(&command(1, None, false)).await.unwrap();
    assert_eq!(bus.write_count(), writes_after_first);
    assert_eq!(
        bus.registers(fire_control, registers::LED_CONTROL.offset, 1),
        vec![0b100]
    );

    let history = turret.command_history();
    assert_eq!(history.len(), 2);
    assert_eq!(turret.data().await.last_sequence, 1);
}

#[tokio::test]
async fn absolute_command_clamps_pitch_and_invalidates_cache() {
    let (bus, turret) = make_turret(|p| {
        p.min_pitch_deg = -90.0;
        p.max_pitch_deg = 90.0;
    });
    let gimbal = turret.parameters().gimbal_address;

    // Establish a known cached command first.
    turret.poll().await.unwrap();
    assert!(turret.data().await.imu_command.is_some());

    turret
        .submit_command(&command(
            1,
            Some(MotionCommand::Absolute {
                pitch_deg: 95.0,
                yaw_deg: 0.0,
            }),
            false,
        ))
        .await
        .unwrap();

    let data = turret.data().await;
    assert!(data.imu_command.is_none());
    assert!(data.rate.is_zero());

    // The wire carries the clamped 90 degrees, never the raw 95.
    let pitch_regs = bus.registers(
        gimbal,
        registers::PITCH_COMMAND.offset,
        registers::PITCH_COMMAND.length,
    );
    assert_eq!(protocol::decode_signed_28(&pitch_regs).unwrap(), 90_000);

    // Absolute yaw of zero encodes to the register midpoint.
    assert_eq!(
        bus.registers(
            gimbal,
            registers::ABSOLUTE_YAW_COMMAND.offset,
            registers::ABSOLUTE_YAW_COMMAND.length,
        ),
        vec![0x7f, 0x3f]
    );
}

#[tokio::test]
async fn poll_rereads_command_after_absolute() {
    let (bus, turret) = make_turret(|_| {});
    let gimbal = turret.parameters().gimbal_address;

    turret
        .submit_command(&command(
            1,
            Some(MotionCommand::Absolute {
                pitch_deg: 5.0,
                yaw_deg: 10.0,
            }),
            false,
        ))
        .await
        .unwrap();
    assert!(turret.data().await.imu_command.is_none());

    // The board has meanwhile retranslated the move into a new relative
    // baseline.
    bus.set_registers(
        gimbal,
        registers::IMU_COMMAND_BLOCK.offset,
        &protocol::encode_imu_command(3.0, 4.0),
    );

    turret.poll().await.unwrap();
    let cached = turret.data().await.imu_command.unwrap();
    assert_eq!(cached.pitch_deg, 3.0);
    assert_eq!(cached.yaw_deg, 4.0);
}

#[tokio::test]
async fn relative_command_writes_clamped_value() {
    let (bus, turret) = make_turret(|_| {});
    let gimbal = turret.parameters().gimbal_address;

    // Default pitch range tops out at 10 degrees.
    turret
        .submit_command(&command(
            1,
            Some(MotionCommand::ImuRelative {
                pitch_deg: 20.0,
                yaw_deg: 5.0,
            }),
            false,
        ))
        .await
        .unwrap();

    let cached = turret.data().await.imu_command.unwrap();
    assert_eq!(cached.pitch_deg, 10.0);
    assert_eq!(cached.yaw_deg, 5.0);
    assert_eq!(gimbal_command_block(&bus, gimbal), (10.0, 5.0));
}

#[tokio::test]
async fn rate_integrates_against_baseline_each_tick() {
    let (bus, turret) = make_turret(|p| p.period_s = 0.5);
    let gimbal = turret.parameters().gimbal_address;

    turret
        .submit_command(&command(
            1,
            Some(MotionCommand::ImuRelative {
                pitch_deg: 0.0,
                yaw_deg: 0.0,
            }),
            false,
        ))
        .await
        .unwrap();
    turret
        .submit_command(&command(
            2,
            Some(MotionCommand::Rate {
                pitch_dps: 2.0,
                yaw_dps: 4.0,
            }),
            false,
        ))
        .await
        .unwrap();

    for _ in 0..3 {
        turret.poll().await.unwrap();
    }

    // Three ticks of rate x period on each axis.
    let cached = turret.data().await.imu_command.unwrap();
    assert_eq!(cached.pitch_deg, 3.0);
    assert_eq!(cached.yaw_deg, 6.0);
    assert_eq!(gimbal_command_block(&bus, gimbal), (3.0, 6.0));
}

#[tokio::test]
async fn rate_clamps_pitch_every_tick() {
    let (bus, turret) = make_turret(|p| p.period_s = 0.5);
    let gimbal = turret.parameters().gimbal_address;

    turret
        .submit_command(&command(
            1,
            Some(MotionCommand::ImuRelative {
                pitch_deg: 9.0,
                yaw_deg: 0.0,
            }),
            false,
        ))
        .await
        .unwrap();
    turret
        .submit_command(&command(
            2,
            Some(MotionCommand::Rate {
                pitch_dps: 4.0,
                yaw_dps: 0.0,
            }),
            false,
        ))
        .await
        .unwrap();

    turret.poll().await.unwrap();
    turret.poll().await.unwrap();

    // 9 + 2 would overshoot; the default 10 degree ceiling holds on both
    // ticks.
    let cached = turret.data().await.imu_command.unwrap();
    assert_eq!(cached.pitch_deg, 10.0);
    assert_eq!(gimbal_command_block(&bus, gimbal).0, 10.0);
}

#[tokio::test]
async fn zero_rate_is_a_no_op_on_the_bus() {
    let (bus, turret) = make_turret(|_| {});

    turret
        .submit_command(&command(
            1,
            Some(MotionCommand::Absolute {
                pitch_deg: 5.0,
                yaw_deg: 0.0,
            }),
            false,
        ))
        .await
        .unwrap();
    turret
        .submit_command(&command(
            2,
            Some(MotionCommand::Rate {
                pitch_dps: 0.0,
                yaw_dps: 0.0,
            }),
            false,
        ))
        .await
        .unwrap();

    // The poll performs reads only: the cache re-read happens, but a zero
    // rate never produces a command write.
    let writes_before = bus.write_count();
    turret.poll().await.unwrap();
    assert_eq!(bus.write_count(), writes_before);
    assert!(turret.data().await.rate.is_zero());
}

#[tokio::test]
async fn absolute_takes_precedence_and_clears_rate() {
    let (_bus, turret) = make_turret(|_| {});

    turret
        .submit_command(&command(
            1,
            Some(MotionCommand::Rate {
                pitch_dps: 5.0,
                yaw_dps: 5.0,
            }),
            false,
        ))
        .await
        .unwrap();
    assert!(!turret.data().await.rate.is_zero());

    turret
        .submit_command(&command(
            2,
            Some(MotionCommand::Absolute {
                pitch_deg: 0.0,
                yaw_deg: 0.0,
            }),
            false,
        ))
        .await
        .unwrap();

    let data = turret.data().await;
    assert!(data.rate.is_zero());
    assert!(data.imu_command.is_none());
}

#[tokio::test]
async fn telemetry_decodes_board_registers() {
    let (bus, turret) = make_turret(|_| {});
    let gimbal = turret.parameters().gimbal_address;
    let fire_control = turret.parameters().fire_control_address;

    bus.set_registers(
        gimbal,
        registers::IMU_PITCH.offset,
        &protocol::encode_signed_28(12_345),
    );
    bus.set_registers(
        gimbal,
        registers::IMU_YAW.offset,
        &protocol::encode_signed_28(-5_000),
    );
    // Full-scale absolute yaw code decodes to exactly zero.
    bus.set_registers(gimbal, registers::ABSOLUTE_YAW.offset, &[0x7f, 0x7f]);
    bus.set_registers(fire_control, registers::FIRE_PWM.offset, &[1, 0]);

    turret.poll().await.unwrap();

    let data = turret.data().await;
    assert_eq!(data.imu.pitch_deg, 12.345);
    assert_eq!(data.imu.yaw_deg, -5.0);
    assert_eq!(data.absolute.pitch_deg, data.imu.pitch_deg);
    assert_eq!(data.absolute.yaw_deg, 0.0);
    assert!(data.fire_enabled);
    assert!(!data.agitator_enabled);
    assert!(data.timestamp_ms > 0);
}

#[tokio::test]
async fn first_tick_publishes_three_snapshots() {
    let (bus, turret) = make_turret(|_| {});
    let fire_control = turret.parameters().fire_control_address;
    bus.set_registers(fire_control, registers::FIRE_PWM.offset, &[1, 1]);

    let mut rx = turret.subscribe_telemetry();
    turret.poll().await.unwrap();

    // Cache recovery, telemetry decode, fire control flags.
    let first = rx.recv().await.unwrap();
    assert!(first.imu_command.is_some());
    assert!(!first.fire_enabled);

    let _second = rx.recv().await.unwrap();

    let third = rx.recv().await.unwrap();
    assert!(third.fire_enabled);
    assert!(third.agitator_enabled);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn audit_feed_carries_discarded_duplicates() {
    let (_bus, turret) = make_turret(|_| {});
    let mut rx = turret.subscribe_commands();

    turret.submit_command(&command(1, None, true)).await.unwrap();
    turret.submit_command(&command(1, None, true)).await.unwrap();

    assert_eq!(rx.recv().await.unwrap().command.sequence, 1);
    assert_eq!(rx.recv().await.unwrap().command.sequence, 1);
    assert_eq!(turret.data().await.last_sequence, 1);
}

#[tokio::test]
async fn bus_fault_is_fatal_for_the_tick() {
    let (bus, turret) = make_turret(|_| {});

    bus.fail_next_io();
    let err = turret.poll().await.unwrap_err();
    assert!(matches!(err, BusError::Io(_)));

    // Nothing was decoded from the failed tick.
    assert!(turret.data().await.imu_command.is_none());
}

#[tokio::test]
async fn started_loop_surfaces_fatal_error_through_handle() {
    let (bus, turret) = make_turret(|p| p.period_s = 0.005);

    bus.fail_next_io();
    let handle = turret.start();
    let result = handle.await.unwrap();
    assert!(matches!(result, Err(BusError::Io(_))));
}

#[tokio::test]
async fn bus_shutdown_ends_loop_cleanly() {
    let (bus, turret) = make_turret(|p| p.period_s = 0.005);

    let handle = turret.start();
    bus.shutdown();
    assert_eq!(handle.await.unwrap(), Ok(()));
}

#[tokio::test]
async fn stop_ends_loop_cleanly() {
    let (_bus, turret) = make_turret(|p| p.period_s = 0.005);

    let handle = turret.start();
    tokio::time::sleep(Duration::from_millis(30)).await;
    turret.stop();
    assert_eq!(handle.await.unwrap(), Ok(()));
}
