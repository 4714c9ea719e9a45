use crate::types::{ConfigError, RawSample};
use glam::I16Vec3;
use std::time::Instant;
use thiserror::Error;

/// Width of every IMU field in the report: one little-endian i16.
const FIELD_LEN: usize = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Report too short: got {len} bytes, need {needed}")]
    ShortReport { len: usize, needed: usize },
}

/// Byte positions of the six IMU fields inside a fixed-size controller report.
///
/// Firmware layouts differ, so nothing here is hard-coded; the defaults live
/// in the config crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportLayout {
    report_size: usize,
    accel: [usize; 3],
    gyro: [usize; 3],
    /// Smallest report length that still covers every field.
    needed: usize,
}

impl ReportLayout {
    pub fn new(report_size: usize, accel: [usize; 3], gyro: [usize; 3]) -> Result<Self, ConfigError> {
        let fields = [
            ("accel.x", accel[0]),
            ("accel.y", accel[1]),
            ("accel.z", accel[2]),
            ("gyro.x", gyro[0]),
            ("gyro.y", gyro[1]),
            ("gyro.z", gyro[2]),
        ];

        let mut needed = 0;
        for (field, offset) in fields {
            let end = offset
                .checked_add(FIELD_LEN)
                .filter(|&end| end <= report_size)
                .ok_or(ConfigError::FieldOutOfBounds {
                    field,
                    offset,
                    report_size,
                })?;
            needed = needed.max(end);
        }

        Ok(Self {
            report_size,
            accel,
            gyro,
            needed,
        })
    }

    /// Size of the buffer requested from the transport per report.
    pub fn report_size(&self) -> usize {
        self.report_size
    }

    /// Decode one report into a sample stamped with `timestamp`.
    ///
    /// Reports longer than `report_size` are accepted; only the configured
    /// fields are read.
    pub fn decode(&self, report: &[u8], timestamp: Instant) -> Result<RawSample, DecodeError> {
        if report.len() < self.needed {
            return Err(DecodeError::ShortReport {
                len: report.len(),
                needed: self.needed,
            });
        }

        let field = |offset: usize| i16::from_le_bytes([report[offset], report[offset + 1]]);
        let axes = |offsets: [usize; 3]| I16Vec3::new(field(offsets[0]), field(offsets[1]), field(offsets[2]));

        Ok(RawSample {
            accel: axes(self.accel),
            gyro: axes(self.gyro),
            timestamp,
        })
    }
}
