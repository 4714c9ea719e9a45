pub mod calibration;
pub mod fusion;
pub mod protocol;
pub mod source;
pub mod state;
pub mod transport;
pub mod types;

use calibration::{CalibrationStore, CalibrationTrigger};
use fusion::{FusionEngine, FusionError};
use protocol::ReportLayout;
use source::{AcquisitionStatus, LatestSample, SampleSource};
use state::{OrientationReader, OrientationState};
use std::time::Instant;
use transport::ReportTransport;
use types::{CalibrationOffsets, ConfigError, OrientationEstimate, TrackerOptions};

/// Orientation tracker for a handheld IMU controller.
///
/// Acquisition runs on its own thread and only ever overwrites the latest
/// sample. The owner drives [`tick`](Self::tick) at its own cadence (e.g. the
/// render loop); each tick fuses the freshest sample with the current
/// calibration and publishes one complete [`OrientationEstimate`].
pub struct OrientationTracker {
    options: TrackerOptions,
    engine: FusionEngine,
    source: SampleSource,
    latest: LatestSample,
    calibration: CalibrationStore,
    state: OrientationState,
    last_tick: Option<Instant>,
    stale: bool,
}

impl OrientationTracker {
    pub fn new(options: TrackerOptions, layout: ReportLayout) -> Self {
        let source = SampleSource::new(layout);
        let latest = source.latest();
        Self {
            options,
            engine: FusionEngine::new(options.filter).with_gyro_deadzone(options.gyro_deadzone),
            source,
            latest,
            calibration: CalibrationStore::new(),
            state: OrientationState::new(),
            last_tick: None,
            stale: false,
        }
    }

    /// Start acquiring from `transport` on a detached thread.
    ///
    /// Call again with a fresh transport after the previous one stopped;
    /// fusion state and calibration carry over.
    pub fn attach<T: ReportTransport>(&self, transport: T) -> std::io::Result<()> {
        self.source.spawn(transport)?;
        tracing::info!("IMU acquisition started");
        Ok(())
    }

    /// Open a transport on the acquisition thread and start reading from it.
    ///
    /// A failed open shows up as [`AcquisitionStatus::Stopped`].
    pub fn attach_with<T, F>(&self, open: F) -> std::io::Result<()>
    where
        T: ReportTransport,
        F: FnOnce() -> Result<T, transport::TransportError> + Send + 'static,
    {
        self.source.spawn_with(open)?;
        tracing::info!("IMU acquisition started");
        Ok(())
    }

    pub fn options(&self) -> TrackerOptions {
        self.options
    }

    pub fn acquisition_status(&self) -> AcquisitionStatus {
        self.source.status()
    }

    /// Handle for the calibration command; usable from any thread.
    pub fn calibration_trigger(&self) -> CalibrationTrigger {
        CalibrationTrigger::new(self.calibration.clone(), self.latest.clone())
    }

    pub fn calibration(&self) -> CalibrationOffsets {
        self.calibration.current()
    }

    pub fn reader(&self) -> OrientationReader {
        self.state.reader()
    }

    pub fn snapshot(&self) -> OrientationEstimate {
        self.state.snapshot()
    }

    /// Make the current pose the origin and publish it.
    pub fn zero(&mut self) {
        self.engine.reset();
        let mut estimate = self.state.snapshot();
        (estimate.pitch, estimate.roll, estimate.yaw) = self.engine.angles();
        self.state.publish(estimate);
        tracing::info!("Orientation zeroed");
    }

    /// Run one fusion tick, with `dt` measured from the previous tick.
    ///
    /// A rejected tick is logged and the previous estimate is returned unchanged.
    pub fn tick(&mut self, now: Instant) -> OrientationEstimate {
        let dt = match self.last_tick {
            Some(last) => now.saturating_duration_since(last),
            None => self.options.nominal_dt,
        };

        match self.tick_with_dt(dt.as_secs_f64(), now) {
            Ok(estimate) => estimate,
            Err(err) => {
                tracing::warn!(%err, "Fusion tick skipped");
                self.state.snapshot()
            }
        }
    }

    /// Run one fusion tick covering `dt` seconds.
    pub fn tick_with_dt(&mut self, dt: f64, now: Instant) -> Result<OrientationEstimate, FusionError> {
        if !(dt > 0.0) {
            return Err(ConfigError::InvalidTimestep(dt).into());
        }

        let sample = self.latest.get().filter(|sample| {
            self.source.status().is_running()
                && now.saturating_duration_since(sample.timestamp) <= self.options.stale_after
        });

        let estimate = match sample {
            Some(sample) => {
                let step = self.engine.update(&sample, &self.calibration.current(), dt)?;
                OrientationEstimate {
                    pitch: step.pitch,
                    roll: step.roll,
                    yaw: step.yaw,
                    updated_at: Some(now),
                    stale: false,
                }
            }
            None => {
                // Hold the last angles rather than integrating an old rate.
                let (pitch, roll, yaw) = self.engine.angles();
                OrientationEstimate {
                    pitch,
                    roll,
                    yaw,
                    updated_at: Some(now),
                    stale: true,
                }
            }
        };

        if estimate.stale != self.stale {
            self.stale = estimate.stale;
            if self.stale {
                tracing::warn!("IMU samples are stale, holding orientation");
            } else {
                tracing::info!("IMU samples fresh again");
            }
        }

        self.state.publish(estimate);
        self.last_tick = Some(now);
        Ok(estimate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::tests::{layout, report, ScriptedTransport};
    use crate::types::{FilterConfig, RawSample};
    use glam::{I16Vec3, IVec3};
    use std::time::Duration;

    const DT: f64 = 1.0 / 60.0;

    fn tracker() -> OrientationTracker {
        let filter = FilterConfig::new(0.04, 0.98).unwrap();
        let options = TrackerOptions::new(filter, Duration::from_millis(250), 60.0).unwrap();
        OrientationTracker::new(options, layout())
    }

    fn feed(tracker: &OrientationTracker, accel: [i16; 3], gyro: [i16; 3], at: Instant) {
        tracker.source.inject(RawSample {
            accel: I16Vec3::from_array(accel),
            gyro: I16Vec3::from_array(gyro),
            timestamp: at,
        });
    }

    #[test]
    fn no_sample_publishes_stale_zero() {
        let mut tracker = tracker();
        let estimate = tracker.tick(Instant::now());
        assert!(estimate.stale);
        assert_eq!((estimate.pitch, estimate.roll, estimate.yaw), (0.0, 0.0, 0.0));
        assert_eq!(tracker.reader().snapshot(), estimate);
    }

    #[test]
    fn level_sample_then_calibrate_stays_level() {
        let mut tracker = tracker();
        let trigger = tracker.calibration_trigger();
        let start = Instant::now();

        feed(&tracker, [0, 0, 16384], [0, 0, 0], start);
        let estimate = tracker.tick_with_dt(DT, start).unwrap();
        assert!(!estimate.stale);
        assert!(estimate.pitch.abs() < 1e-9);
        assert!(estimate.roll.abs() < 1e-9);

        let offsets = trigger.calibrate().unwrap();
        assert_eq!(offsets.accel_bias, IVec3::new(0, 0, 16384));
        assert_eq!(tracker.calibration(), offsets);

        // Calibrated on this exact sample: corrected accel is all zeros, so the
        // reference degenerates and the gyro-only prediction (zero) carries.
        for i in 1..=120 {
            let now = start + Duration::from_secs_f64(DT * f64::from(i));
            feed(&tracker, [0, 0, 16384], [0, 0, 0], now);
            let estimate = tracker.tick_with_dt(DT, now).unwrap();
            assert!(!estimate.stale);
            assert_eq!(estimate.pitch, 0.0);
            assert_eq!(estimate.roll, 0.0);
            assert_eq!(estimate.yaw, 0.0);
        }
    }

    #[test]
    fn old_sample_freezes_and_flags_stale() {
        let mut tracker = tracker();
        let start = Instant::now();

        feed(&tracker, [0, 0, 16384], [500, 500, 500], start);
        let first = tracker.tick_with_dt(DT, start).unwrap();
        assert!(!first.stale);
        assert!(first.yaw > 0.0);

        for ms in [300, 400, 1000] {
            let estimate = tracker
                .tick_with_dt(DT, start + Duration::from_millis(ms))
                .unwrap();
            assert!(estimate.stale);
            assert_eq!(estimate.pitch, first.pitch);
            assert_eq!(estimate.roll, first.roll);
            assert_eq!(estimate.yaw, first.yaw);
        }
        assert!(tracker.reader().snapshot().stale);

        // A fresh sample resumes fusion.
        let later = start + Duration::from_secs(2);
        feed(&tracker, [0, 0, 16384], [500, 500, 500], later);
        let resumed = tracker.tick_with_dt(DT, later).unwrap();
        assert!(!resumed.stale);
        assert!(resumed.yaw > first.yaw);
    }

    #[test]
    fn invalid_dt_skips_tick() {
        let mut tracker = tracker();
        let start = Instant::now();
        feed(&tracker, [0, 0, 16384], [100, 0, 0], start);
        let before = tracker.tick_with_dt(DT, start).unwrap();

        assert!(matches!(
            tracker.tick_with_dt(0.0, start),
            Err(FusionError::Config(ConfigError::InvalidTimestep(_)))
        ));
        assert_eq!(tracker.snapshot(), before);

        // `tick` at the same instant yields dt == 0 and keeps the estimate.
        assert_eq!(tracker.tick(start), before);
    }

    #[test]
    fn tick_measures_dt_between_calls() {
        let mut tracker = tracker();
        let start = Instant::now();
        feed(&tracker, [0, 0, 16384], [0, 100, 0], start);

        // First tick uses the nominal 1/60 s.
        let first = tracker.tick(start);
        assert!((first.yaw - 100.0 * 0.04 / 60.0).abs() < 1e-6);

        let later = start + Duration::from_millis(100);
        feed(&tracker, [0, 0, 16384], [0, 100, 0], later);
        let second = tracker.tick(later);
        assert!((second.yaw - first.yaw - 100.0 * 0.04 * 0.1).abs() < 1e-6);
    }

    #[test]
    fn zero_recentres_without_touching_offsets() {
        let mut tracker = tracker();
        let start = Instant::now();
        feed(&tracker, [3000, 0, 15000], [200, 200, 200], start);
        tracker.tick_with_dt(DT, start).unwrap();
        let offsets = tracker.calibration_trigger().calibrate().unwrap();

        tracker.zero();
        let snapshot = tracker.reader().snapshot();
        assert_eq!((snapshot.pitch, snapshot.roll, snapshot.yaw), (0.0, 0.0, 0.0));
        assert_eq!(tracker.calibration(), offsets);
    }

    #[test]
    fn attach_while_running_is_refused() {
        let tracker = tracker();
        let (report_tx, report_rx) = std::sync::mpsc::channel::<Vec<u8>>();
        tracker
            .attach_with(move || {
                Ok(ScriptedTransport::new(report_rx.recv().ok()))
            })
            .unwrap();

        let err = tracker
            .attach(ScriptedTransport::new([report([0, 0, 16384], [0, 0, 0])]))
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
        drop(report_tx);
    }

    #[test]
    fn transport_failure_marks_estimate_stale() {
        let mut tracker = tracker();
        tracker
            .attach(ScriptedTransport::new([report([0, 0, 16384], [0, 0, 0])]))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while tracker.acquisition_status().is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(matches!(
            tracker.acquisition_status(),
            AcquisitionStatus::Stopped(_)
        ));

        // The last sample is still fresh by age, but its source is gone.
        let estimate = tracker.tick(Instant::now());
        assert!(estimate.stale);
    }
}
