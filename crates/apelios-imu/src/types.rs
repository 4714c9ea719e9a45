use glam::{I16Vec3, IVec3};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Raw sensor reading decoded from one controller report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample {
    /// Accelerometer counts (x, y, z).
    pub accel: I16Vec3,
    /// Gyroscope counts (x, y, z).
    pub gyro: I16Vec3,
    /// When the report was decoded.
    pub timestamp: Instant,
}

/// Bias offsets subtracted from every raw sample before fusion.
///
/// Published as a whole; a new calibration replaces the previous value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationOffsets {
    pub accel_bias: IVec3,
    pub gyro_bias: IVec3,
    /// `None` until the first calibration command.
    pub captured_at: Option<Instant>,
}

impl Default for CalibrationOffsets {
    fn default() -> Self {
        Self {
            accel_bias: IVec3::ZERO,
            gyro_bias: IVec3::ZERO,
            captured_at: None,
        }
    }
}

/// Fused orientation in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationEstimate {
    pub pitch: f64,
    pub roll: f64,
    /// Integrated from the gyro only, so it drifts without bound under a constant bias.
    pub yaw: f64,
    /// `None` until the first fusion tick.
    pub updated_at: Option<Instant>,
    pub stale: bool,
}

impl Default for OrientationEstimate {
    fn default() -> Self {
        Self {
            pitch: 0.0,
            roll: 0.0,
            yaw: 0.0,
            updated_at: None,
            stale: false,
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum ConfigError {
    #[error("timestep must be positive, got {0} s")]
    InvalidTimestep(f64),
    #[error("gyro sensitivity must be positive and finite, got {0}")]
    InvalidSensitivity(f64),
    #[error("filter weight must lie in [0, 1], got {0}")]
    InvalidWeight(f64),
    #[error("staleness threshold must be non-zero")]
    InvalidStaleThreshold,
    #[error("tick rate must be positive and finite, got {0}")]
    InvalidTickRate(f64),
    #[error("{field} at byte {offset} does not fit in a {report_size}-byte report")]
    FieldOutOfBounds {
        field: &'static str,
        offset: usize,
        report_size: usize,
    },
}

/// Complementary filter tuning, fixed for a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterConfig {
    gyro_sensitivity: f64,
    filter_weight: f64,
}

impl FilterConfig {
    pub fn new(gyro_sensitivity: f64, filter_weight: f64) -> Result<Self, ConfigError> {
        if !gyro_sensitivity.is_finite() || gyro_sensitivity <= 0.0 {
            return Err(ConfigError::InvalidSensitivity(gyro_sensitivity));
        }
        if !(0.0..=1.0).contains(&filter_weight) {
            return Err(ConfigError::InvalidWeight(filter_weight));
        }
        Ok(Self {
            gyro_sensitivity,
            filter_weight,
        })
    }

    /// Degrees per second per gyro count.
    pub fn gyro_sensitivity(&self) -> f64 {
        self.gyro_sensitivity
    }

    /// Share of the gyro prediction in the fused pitch/roll.
    pub fn filter_weight(&self) -> f64 {
        self.filter_weight
    }
}

/// Everything the tracker needs besides its inputs.
#[derive(Debug, Clone, Copy)]
pub struct TrackerOptions {
    pub filter: FilterConfig,
    /// A sample older than this marks the published estimate stale.
    pub stale_after: Duration,
    /// Elapsed time assumed for the very first tick.
    pub nominal_dt: Duration,
    /// Corrected gyro counts at or below this magnitude are ignored.
    pub gyro_deadzone: u16,
}

impl TrackerOptions {
    pub fn new(filter: FilterConfig, stale_after: Duration, tick_rate_hz: f64) -> Result<Self, ConfigError> {
        if stale_after.is_zero() {
            return Err(ConfigError::InvalidStaleThreshold);
        }
        if !tick_rate_hz.is_finite() || tick_rate_hz <= 0.0 {
            return Err(ConfigError::InvalidTickRate(tick_rate_hz));
        }
        // Rates too low overflow a Duration, rates too high round to a zero period.
        let nominal_dt = Duration::try_from_secs_f64(1.0 / tick_rate_hz)
            .ok()
            .filter(|period| !period.is_zero())
            .ok_or(ConfigError::InvalidTickRate(tick_rate_hz))?;
        Ok(Self {
            filter,
            stale_after,
            nominal_dt,
            gyro_deadzone: 0,
        })
    }

    pub fn with_gyro_deadzone(mut self, counts: u16) -> Self {
        self.gyro_deadzone = counts;
        self
    }
}
