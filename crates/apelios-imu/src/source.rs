use crate::protocol::ReportLayout;
use crate::transport::{ReportTransport, TransportError};
use crate::types::RawSample;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

/// State of the acquisition context, as seen by its owner.
#[derive(Debug, Clone)]
pub enum AcquisitionStatus {
    /// No transport attached yet.
    Idle,
    Running,
    /// The transport failed; no further samples will arrive from it.
    Stopped(Arc<TransportError>),
}

impl AcquisitionStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, AcquisitionStatus::Running)
    }
}

/// Single-slot cell holding the freshest decoded sample.
///
/// Writers overwrite, readers copy; nobody waits on anybody.
#[derive(Clone)]
pub struct LatestSample {
    rx: watch::Receiver<Option<RawSample>>,
}

impl LatestSample {
    pub fn get(&self) -> Option<RawSample> {
        *self.rx.borrow()
    }
}

/// Decodes transport reports and publishes the newest one.
///
/// One `SampleSource` lives for the whole session; each call to [`spawn`]
/// starts a fresh acquisition thread (e.g. after a reconnect) that writes
/// into the same sample cell.
///
/// [`spawn`]: SampleSource::spawn
pub struct SampleSource {
    layout: ReportLayout,
    sample_tx: Arc<watch::Sender<Option<RawSample>>>,
    status_tx: Arc<watch::Sender<AcquisitionStatus>>,
}

impl SampleSource {
    pub fn new(layout: ReportLayout) -> Self {
        let (sample_tx, _) = watch::channel(None);
        let (status_tx, _) = watch::channel(AcquisitionStatus::Idle);
        Self {
            layout,
            sample_tx: Arc::new(sample_tx),
            status_tx: Arc::new(status_tx),
        }
    }

    pub fn latest(&self) -> LatestSample {
        LatestSample {
            rx: self.sample_tx.subscribe(),
        }
    }

    pub fn status(&self) -> AcquisitionStatus {
        self.status_tx.borrow().clone()
    }

    /// Start reading `transport` on a dedicated thread.
    ///
    /// The thread is detached: it exits on a transport error or once every
    /// sample reader is gone, and shutdown never waits for it.
    pub fn spawn<T: ReportTransport>(&self, transport: T) -> std::io::Result<()> {
        self.spawn_with(move || Ok(transport))
    }

    /// Like [`spawn`](Self::spawn), but `open` also runs on the acquisition
    /// thread so a slow device open never blocks the caller.
    ///
    /// Fails with [`ErrorKind::AlreadyExists`](std::io::ErrorKind::AlreadyExists)
    /// while a previous acquisition thread is still running.
    pub fn spawn_with<T, F>(&self, open: F) -> std::io::Result<()>
    where
        T: ReportTransport,
        F: FnOnce() -> Result<T, TransportError> + Send + 'static,
    {
        // Check and claim in one step so two callers can't both start a thread.
        let claimed = self.status_tx.send_if_modified(|status| {
            if status.is_running() {
                false
            } else {
                *status = AcquisitionStatus::Running;
                true
            }
        });
        if !claimed {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "IMU acquisition already running",
            ));
        }

        let layout = self.layout;
        let sample_tx = self.sample_tx.clone();
        let status_tx = self.status_tx.clone();

        let spawned = std::thread::Builder::new()
            .name("imu-acquisition".into())
            .spawn(move || {
                let err = match open() {
                    Ok(transport) => acquisition_loop(transport, layout, &sample_tx),
                    Err(err) => Some(err),
                };
                if let Some(err) = err {
                    tracing::error!(%err, "IMU acquisition stopped");
                    status_tx.send_replace(AcquisitionStatus::Stopped(Arc::new(err)));
                } else {
                    tracing::debug!("IMU acquisition finished, no readers left");
                    status_tx.send_replace(AcquisitionStatus::Idle);
                }
            });

        if let Err(e) = spawned {
            self.status_tx.send_replace(AcquisitionStatus::Idle);
            return Err(e);
        }
        Ok(())
    }

    /// Publish `sample` as if a running acquisition thread had decoded it.
    #[cfg(test)]
    pub(crate) fn inject(&self, sample: RawSample) {
        self.status_tx.send_replace(AcquisitionStatus::Running);
        self.sample_tx.send_replace(Some(sample));
    }
}

/// Read until the transport fails or nobody is listening any more.
fn acquisition_loop<T: ReportTransport>(
    mut transport: T,
    layout: ReportLayout,
    sample_tx: &watch::Sender<Option<RawSample>>,
) -> Option<TransportError> {
    let mut sample_count: u64 = 0;
    let mut dropped: u64 = 0;

    while !sample_tx.is_closed() {
        if let Err(e) = acquire_once(&mut transport, &layout, sample_tx) {
            match e {
                AcquireError::Transport(err) => return Some(err),
                AcquireError::Decode(err) => {
                    dropped += 1;
                    tracing::trace!(%err, dropped, "Dropping malformed report");
                    continue;
                }
            }
        }
        sample_count += 1;
        if sample_count % 1000 == 0 {
            tracing::debug!(sample_count, dropped, "IMU samples processed");
        }
    }
    None
}

enum AcquireError {
    Transport(TransportError),
    Decode(crate::protocol::DecodeError),
}

/// Block for one report, decode it and overwrite the sample cell.
///
/// A malformed report leaves the previously published sample in place.
fn acquire_once<T: ReportTransport>(
    transport: &mut T,
    layout: &ReportLayout,
    sample_tx: &watch::Sender<Option<RawSample>>,
) -> Result<(), AcquireError> {
    let report = transport.next_report().map_err(AcquireError::Transport)?;
    let sample = layout
        .decode(&report, Instant::now())
        .map_err(AcquireError::Decode)?;
    sample_tx.send_replace(Some(sample));
    Ok(())
}
