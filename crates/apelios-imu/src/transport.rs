use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to open {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Report read failed: {0}")]
    Read(#[from] std::io::Error),
    #[error("Device disconnected")]
    Disconnected,
}

/// Source of fixed-size opaque controller reports.
///
/// `next_report` may block for as long as the device needs; it is only ever
/// called from the acquisition thread.
pub trait ReportTransport: Send + 'static {
    fn next_report(&mut self) -> Result<Vec<u8>, TransportError>;
}

/// Reads reports straight from a Linux hidraw node (e.g. `/dev/hidraw2`).
pub struct HidrawTransport {
    device: File,
    buf: Vec<u8>,
}

impl HidrawTransport {
    pub fn open(path: impl AsRef<Path>, report_size: usize) -> Result<Self, TransportError> {
        let path = path.as_ref();
        let device = File::open(path).map_err(|source| TransportError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(?path, report_size, "Opened HID device");

        Ok(Self {
            device,
            buf: vec![0u8; report_size],
        })
    }
}

impl ReportTransport for HidrawTransport {
    fn next_report(&mut self) -> Result<Vec<u8>, TransportError> {
        // hidraw hands out one report per read; a short read is still a report.
        match self.device.read(&mut self.buf)? {
            0 => Err(TransportError::Disconnected),
            n => Ok(self.buf[..n].to_vec()),
        }
    }
}
