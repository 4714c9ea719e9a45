use anyhow::Result;
use apelios_config::{AppConfig, DeviceConfig};
use apelios_imu::calibration::CalibrationTrigger;
use apelios_imu::protocol::ReportLayout;
use apelios_imu::transport::HidrawTransport;
use apelios_imu::types::{FilterConfig, TrackerOptions};
use apelios_imu::OrientationTracker;
use std::io::BufRead;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Commands that must run on the tick loop.
enum Command {
    Zero,
    Quit,
}

fn build_tracker(config: &AppConfig) -> Result<OrientationTracker> {
    let layout = ReportLayout::new(
        config.device.report_size,
        config.device.accel_offsets,
        config.device.gyro_offsets,
    )?;
    let filter = FilterConfig::new(config.filter.gyro_sensitivity, config.filter.filter_weight)?;
    let options = TrackerOptions::new(
        filter,
        Duration::from_millis(config.filter.stale_after_ms),
        config.tick_rate_hz,
    )?
    .with_gyro_deadzone(config.filter.gyro_deadzone);

    Ok(OrientationTracker::new(options, layout))
}

/// Hand the controller to a fresh acquisition thread, which also opens it.
///
/// Open failures are reported through the acquisition status and retried
/// by the tick loop.
fn connect(tracker: &OrientationTracker, device: &DeviceConfig) {
    let path = device.path.clone();
    let report_size = device.report_size;
    if let Err(e) = tracker.attach_with(move || HidrawTransport::open(path, report_size)) {
        error!(?e, "Failed to start IMU acquisition thread");
    }
}

/// Read key commands from stdin on a detached thread.
///
/// Calibration runs right here; everything touching the fusion state is
/// forwarded to the tick loop.
fn spawn_input_thread(
    trigger: CalibrationTrigger,
    command_tx: mpsc::UnboundedSender<Command>,
) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("input".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let command = match line.trim() {
                    "" | "c" => {
                        if let Err(e) = trigger.calibrate() {
                            warn!(%e, "Calibration ignored");
                        }
                        continue;
                    }
                    "z" => Command::Zero,
                    "q" => Command::Quit,
                    other => {
                        warn!(input = other, "Unknown command");
                        continue;
                    }
                };
                if command_tx.send(command).is_err() {
                    break;
                }
            }
        })?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "apelios=info,apelios_imu=info,apelios_config=info".into()),
        )
        .init();

    info!("Apelios orientation tracker starting");

    let config = apelios_config::load_or_init_config().unwrap_or_else(|e| {
        warn!(?e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Invalid tuning or layout refuses to start.
    let mut tracker = build_tracker(&config)?;
    connect(&tracker, &config.device);

    let (command_tx, mut command_rx) = mpsc::unbounded_channel();
    spawn_input_thread(tracker.calibration_trigger(), command_tx)?;
    info!("Keys: Enter/c = calibrate (hold still and level), z = zero, q = quit");

    let mut ticker = tokio::time::interval(tracker.options().nominal_dt);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let heartbeat_every = (config.tick_rate_hz.round() as u64).max(1);
    let reconnect_delay = Duration::from_millis(config.device.reconnect_delay_ms);
    let mut last_connect = Instant::now();
    let mut tick_count: u64 = 0;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                let estimate = tracker.tick(now);

                tick_count += 1;
                if tick_count % heartbeat_every == 0 {
                    info!(
                        pitch = estimate.pitch,
                        roll = estimate.roll,
                        yaw = estimate.yaw,
                        stale = estimate.stale,
                        "Orientation"
                    );
                }

                // Reconnect policy lives here, not in the acquisition thread.
                if !tracker.acquisition_status().is_running()
                    && now.duration_since(last_connect) >= reconnect_delay
                {
                    last_connect = now;
                    connect(&tracker, &config.device);
                }
            }
            Some(command) = command_rx.recv() => match command {
                Command::Zero => tracker.zero(),
                Command::Quit => break,
            },
            _ = &mut shutdown => {
                info!("Interrupted");
                break;
            }
        }
    }

    // The acquisition and input threads are detached and die with the process.
    info!("Shutting down");
    Ok(())
}
