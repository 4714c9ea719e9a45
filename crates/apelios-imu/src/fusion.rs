use crate::types::{CalibrationOffsets, ConfigError, FilterConfig, RawSample};
use glam::I64Vec3;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum FusionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Accelerometer reference has no x/z component, cannot derive pitch/roll")]
    DegenerateReference,
}

/// Intermediate values of one fusion step, kept for inspection and tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionStep {
    pub corrected_accel: I64Vec3,
    pub corrected_gyro: I64Vec3,
    pub pitch_gyro: f64,
    pub roll_gyro: f64,
    /// `(pitch_accel, roll_accel)`, or `None` when the reference was degenerate.
    pub reference: Option<(f64, f64)>,
    pub pitch: f64,
    pub roll: f64,
    pub yaw: f64,
}

/// Complementary filter over Euler angles (degrees).
///
/// Pitch and roll blend the gyro-integrated prediction with the gravity
/// direction from the accelerometer. Yaw has no reference and is integrated
/// from the gyro alone, so any residual bias makes it drift linearly.
pub struct FusionEngine {
    filter: FilterConfig,
    gyro_deadzone: i64,
    pitch: f64,
    roll: f64,
    yaw: f64,
}

impl FusionEngine {
    pub fn new(filter: FilterConfig) -> Self {
        Self {
            filter,
            gyro_deadzone: 0,
            pitch: 0.0,
            roll: 0.0,
            yaw: 0.0,
        }
    }

    pub fn with_gyro_deadzone(mut self, counts: u16) -> Self {
        self.gyro_deadzone = i64::from(counts);
        self
    }

    /// Current `(pitch, roll, yaw)` in degrees.
    pub fn angles(&self) -> (f64, f64, f64) {
        (self.pitch, self.roll, self.yaw)
    }

    /// Re-centre: the current pose becomes (0, 0, 0). Offsets are untouched.
    pub fn reset(&mut self) {
        self.pitch = 0.0;
        self.roll = 0.0;
        self.yaw = 0.0;
    }

    /// Advance the filter by `dt` seconds using `sample`.
    ///
    /// On error the previous angles are kept unchanged.
    pub fn update(
        &mut self,
        sample: &RawSample,
        offsets: &CalibrationOffsets,
        dt: f64,
    ) -> Result<FusionStep, FusionError> {
        // Also catches NaN.
        if !(dt > 0.0) {
            return Err(ConfigError::InvalidTimestep(dt).into());
        }

        let (corrected_accel, corrected_gyro) = correct(sample, offsets);
        let rate = self.apply_deadzone(corrected_gyro).as_dvec3() * self.filter.gyro_sensitivity();

        let pitch_gyro = self.pitch + rate.x * dt;
        let roll_gyro = self.roll - rate.z * dt;
        let yaw = self.yaw + rate.y * dt;

        let reference = match accel_reference(corrected_accel) {
            Ok(angles) => Some(angles),
            Err(err) => {
                tracing::trace!(%err, "Skipping accelerometer correction for this tick");
                None
            }
        };

        let (pitch, roll) = match reference {
            Some((pitch_accel, roll_accel)) => {
                let w = self.filter.filter_weight();
                (
                    w * pitch_gyro + (1.0 - w) * pitch_accel,
                    w * roll_gyro + (1.0 - w) * roll_accel,
                )
            }
            None => (pitch_gyro, roll_gyro),
        };

        self.pitch = pitch;
        self.roll = roll;
        self.yaw = yaw;

        Ok(FusionStep {
            corrected_accel,
            corrected_gyro,
            pitch_gyro,
            roll_gyro,
            reference,
            pitch,
            roll,
            yaw,
        })
    }

    fn apply_deadzone(&self, gyro: I64Vec3) -> I64Vec3 {
        let dz = self.gyro_deadzone;
        gyro.to_array()
            .map(|g| if g.abs() <= dz { 0 } else { g })
            .into()
    }
}

/// Subtract the calibration biases, widened so no combination can overflow.
pub fn correct(sample: &RawSample, offsets: &CalibrationOffsets) -> (I64Vec3, I64Vec3) {
    (
        sample.accel.as_i64vec3() - offsets.accel_bias.as_i64vec3(),
        sample.gyro.as_i64vec3() - offsets.gyro_bias.as_i64vec3(),
    )
}

/// Pitch and roll (degrees) implied by the gravity vector alone.
pub fn accel_reference(accel: I64Vec3) -> Result<(f64, f64), FusionError> {
    // i128: biases are i32, so the squares alone can approach i64::MAX.
    let xz_sq = i128::from(accel.x).pow(2) + i128::from(accel.z).pow(2);
    if xz_sq == 0 {
        return Err(FusionError::DegenerateReference);
    }

    let a = accel.as_dvec3();
    let pitch = a.y.atan2((xz_sq as f64).sqrt()).to_degrees();
    let roll = (-a.x).atan2(a.z).to_degrees();
    Ok((pitch, roll))
}
