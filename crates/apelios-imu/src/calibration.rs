use crate::source::LatestSample;
use crate::types::{CalibrationOffsets, RawSample};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CalibrationError {
    #[error("No IMU sample received yet, nothing to calibrate against")]
    NoSample,
}

/// Holds the bias offsets currently applied by the fusion tick.
///
/// Cloning yields another handle to the same offsets. Every capture replaces
/// the whole [`CalibrationOffsets`] value, so a reader sees either the old or
/// the new offsets, never a mix.
#[derive(Clone)]
pub struct CalibrationStore {
    tx: Arc<watch::Sender<CalibrationOffsets>>,
}

impl CalibrationStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(CalibrationOffsets::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> CalibrationOffsets {
        *self.tx.borrow()
    }

    /// Take `sample` as the new zero point for both sensors.
    ///
    /// The device is assumed to be stationary and level; nothing checks that.
    pub fn capture(&self, sample: &RawSample) -> CalibrationOffsets {
        let offsets = CalibrationOffsets {
            accel_bias: sample.accel.as_ivec3(),
            gyro_bias: sample.gyro.as_ivec3(),
            captured_at: Some(Instant::now()),
        };
        self.tx.send_replace(offsets);

        tracing::info!(
            accel_x = offsets.accel_bias.x,
            accel_y = offsets.accel_bias.y,
            accel_z = offsets.accel_bias.z,
            gyro_x = offsets.gyro_bias.x,
            gyro_y = offsets.gyro_bias.y,
            gyro_z = offsets.gyro_bias.z,
            "IMU calibration captured"
        );
        offsets
    }
}

impl Default for CalibrationStore {
    fn default() -> Self {
        Self::new()
    }
}

/// The no-payload calibration command, bound to whatever input the host uses.
///
/// Cheap to clone and safe to call from any thread.
#[derive(Clone)]
pub struct CalibrationTrigger {
    store: CalibrationStore,
    latest: LatestSample,
}

impl CalibrationTrigger {
    pub(crate) fn new(store: CalibrationStore, latest: LatestSample) -> Self {
        Self { store, latest }
    }

    /// Calibrate against the freshest sample available right now.
    pub fn calibrate(&self) -> Result<CalibrationOffsets, CalibrationError> {
        let sample = self.latest.get().ok_or(CalibrationError::NoSample)?;
        Ok(self.store.capture(&sample))
    }
}
