use std::sync::Arc;
use std::time::Duration;

use clap::{App, Arg};
use colored::*;
use tokio::time;
use tracing::{error, info, warn};

use turretbus::protocol::{self, MotionCommand, TurretCommand};
use turretbus::registers;
use turretbus::{SimServoBus, Turret};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("turretbus-simulator")
        .version("0.1.0")
        .author("Robotics Controls Team")
        .about("🎯 Turret control loop driving simulated gimbal and fire control boards")
        .arg(
            Arg::with_name("period-ms")
                .long("period-ms")
                .value_name("MS")
                .help("Poll period in milliseconds")
                .takes_value(true)
                .default_value("100"),
        )
        .arg(
            Arg::with_name("duration-s")
                .long("duration-s")
                .value_name("SECONDS")
                .help("How long to run before a clean shutdown")
                .takes_value(true)
                .default_value("10"),
        )
        .arg(
            Arg::with_name("json")
                .long("json")
                .help("Print telemetry snapshots as JSON lines"),
        )
        .get_matches();

    let period_ms: u64 = matches.value_of("period-ms").unwrap_or("100").parse()?;
    let duration_s: u64 = matches.value_of("duration-s").unwrap_or("10").parse()?;
    let json = matches.is_present("json");

    println!("{}", "🎯 Turret Bus Simulator".bold());
    println!("========================");

    let bus = Arc::new(SimServoBus::new());
    let mut turret = Turret::new(Arc::clone(&bus));
    turret.parameters_mut().period_s = period_ms as f64 / 1000.0;

    let gimbal = turret.parameters().gimbal_address;
    let fire_control = turret.parameters().fire_control_address;

    // Animate the simulated boards: slow sinusoid on both IMU axes, the
    // matching absolute yaw code, and a fire enable that toggles with it.
    let board_bus = Arc::clone(&bus);
    let animator = tokio::spawn(async move {
        let mut ticker = time::interval(Duration::from_millis(50));
        let mut t = 0.0f64;
        loop {
            ticker.tick().await;
            t += 0.05;

            let pitch_deg = 5.0 * (t * 0.8).sin();
            let yaw_deg = 30.0 * (t * 0.3).sin();
            board_bus.set_registers(
                gimbal,
                registers::IMU_PITCH.offset,
                &protocol::encode_signed_28(protocol::to_millideg(pitch_deg)),
            );
            board_bus.set_registers(
                gimbal,
                registers::IMU_YAW.offset,
                &protocol::encode_signed_28(protocol::to_millideg(yaw_deg)),
            );
            let code = protocol::encode_absolute_yaw(yaw_deg);
            board_bus.set_registers(
                gimbal,
                registers::ABSOLUTE_YAW.offset,
                &[(code & 0x7f) as u8, ((code >> 7) & 0x7f) as u8],
            );
            board_bus.set_registers(
                fire_control,
                registers::FIRE_PWM.offset,
                &[u8::from(t.sin() > 0.0), u8::from(t.cos() > 0.0)],
            );
        }
    });

    // The telemetry consumer stands in for a web/admin layer: it subscribes
    // passively and never touches turret state.
    let mut telemetry_rx = turret.subscribe_telemetry();
    let printer = tokio::spawn(async move {
        while let Ok(data) = telemetry_rx.recv().await {
            if json {
                match serde_json::to_string(&data) {
                    Ok(line) => println!("{}", line),
                    Err(e) => error!("telemetry serialization failed: {}", e),
                }
            } else {
                info!(
                    "📡 pitch={:+7.3}° yaw={:+8.3}° fire={} agitator={} laser_seq={}",
                    data.imu.pitch_deg,
                    data.imu.yaw_deg,
                    data.fire_enabled,
                    data.agitator_enabled,
                    data.last_sequence
                );
            }
        }
    });

    let mut audit_rx = turret.subscribe_commands();
    let auditor = tokio::spawn(async move {
        while let Ok(log) = audit_rx.recv().await {
            info!(
                "📨 command sequence={} motion={:?} laser={}",
                log.command.sequence, log.command.motion, log.command.laser_on
            );
        }
    });

    let handle = turret.start();
    println!("{}", "poll loop armed".green());

    // Scripted traffic exercising every arbitration mode.
    let script = [
        TurretCommand {
            sequence: 1,
            motion: Some(MotionCommand::Absolute {
                pitch_deg: 5.0,
                yaw_deg: 45.0,
            }),
            laser_on: true,
        },
        TurretCommand {
            sequence: 2,
            motion: Some(MotionCommand::ImuRelative {
                pitch_deg: -3.0,
                yaw_deg: 10.0,
            }),
            laser_on: true,
        },
        TurretCommand {
            sequence: 3,
            motion: Some(MotionCommand::Rate {
                pitch_dps: 2.0,
                yaw_dps: -4.0,
            }),
            laser_on: false,
        },
    ];
    for command in &script {
        time::sleep(Duration::from_millis(period_ms * 4)).await;
        turret.submit_command(command).await?;
    }

    tokio::select! {
        _ = time::sleep(Duration::from_secs(duration_s)) => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, shutting down");
        }
    }

    turret.stop();
    let exit_code = match handle.await {
        Ok(Ok(())) => {
            info!("poll loop exited cleanly");
            0
        }
        Ok(Err(e)) => {
            // Fail-fast posture: an unreliable bus halts the process.
            error!("poll loop failed: {}", e);
            1
        }
        Err(e) => {
            error!("poll task panicked: {}", e);
            1
        }
    };

    animator.abort();
    printer.abort();
    auditor.abort();

    println!("{}", "🛑 simulator stopped".dimmed());
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
