use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Fusion tick cadence, normally the render/control loop rate.
    pub tick_rate_hz: f64,
    /// Controller connection and report layout.
    pub device: DeviceConfig,
    /// Complementary filter tuning.
    pub filter: FilterSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 60.0,
            device: DeviceConfig::default(),
            filter: FilterSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// hidraw node of the controller.
    pub path: PathBuf,
    /// Bytes per HID report.
    pub report_size: usize,
    /// Byte offsets of the little-endian i16 accelerometer x/y/z fields.
    pub accel_offsets: [usize; 3],
    /// Byte offsets of the little-endian i16 gyroscope x/y/z fields.
    pub gyro_offsets: [usize; 3],
    /// Wait between reconnect attempts after the device goes away.
    pub reconnect_delay_ms: u64,
}

impl Default for DeviceConfig {
    /// Steam Deck controller report.
    fn default() -> Self {
        Self {
            path: PathBuf::from("/dev/hidraw2"),
            report_size: 64,
            accel_offsets: [24, 26, 28],
            gyro_offsets: [30, 32, 34],
            reconnect_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    /// Degrees per second per raw gyro count.
    pub gyro_sensitivity: f64,
    /// Gyro share of the fused pitch/roll, in [0, 1]. Higher = snappier, more drift.
    pub filter_weight: f64,
    /// Calibrated gyro readings at or below this many counts are ignored. 0 disables.
    pub gyro_deadzone: u16,
    /// Samples older than this mark the orientation stale.
    pub stale_after_ms: u64,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            gyro_sensitivity: 0.04,
            filter_weight: 0.98,
            gyro_deadzone: 0,
            stale_after_ms: 250,
        }
    }
}
