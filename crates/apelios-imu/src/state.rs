use crate::types::OrientationEstimate;
use tokio::sync::watch;

/// Write side of the shared orientation snapshot. There is exactly one.
pub struct OrientationState {
    tx: watch::Sender<OrientationEstimate>,
}

impl OrientationState {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(OrientationEstimate::default());
        Self { tx }
    }

    /// Replace the snapshot as one value.
    pub fn publish(&self, estimate: OrientationEstimate) {
        self.tx.send_replace(estimate);
    }

    pub fn snapshot(&self) -> OrientationEstimate {
        *self.tx.borrow()
    }

    pub fn reader(&self) -> OrientationReader {
        OrientationReader {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for OrientationState {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only consumer handle; clone one per consumer.
#[derive(Clone)]
pub struct OrientationReader {
    rx: watch::Receiver<OrientationEstimate>,
}

impl OrientationReader {
    /// Latest complete estimate (non-blocking).
    pub fn snapshot(&self) -> OrientationEstimate {
        *self.rx.borrow()
    }

    /// Wait for the next published estimate.
    ///
    /// Returns `None` once the writer has been dropped.
    pub async fn changed(&mut self) -> Option<OrientationEstimate> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn starts_at_zero() {
        let state = OrientationState::new();
        let snapshot = state.reader().snapshot();
        assert_eq!(snapshot, OrientationEstimate::default());
        assert!(snapshot.updated_at.is_none());
    }

    #[test]
    fn readers_see_whole_estimates() {
        let state = OrientationState::new();
        let reader = state.reader();

        let handle = std::thread::spawn(move || {
            for i in 0..5000 {
                let v = f64::from(i);
                state.publish(OrientationEstimate {
                    pitch: v,
                    roll: -v,
                    yaw: 2.0 * v,
                    updated_at: Some(Instant::now()),
                    stale: false,
                });
            }
        });

        for _ in 0..5000 {
            let e = reader.snapshot();
            assert_eq!(e.roll, -e.pitch);
            assert_eq!(e.yaw, 2.0 * e.pitch);
        }
        handle.join().unwrap();
        assert_eq!(reader.snapshot().pitch, 4999.0);
    }

    #[tokio::test]
    async fn changed_yields_new_estimate_and_ends_with_writer() {
        let state = OrientationState::new();
        let mut reader = state.reader();

        state.publish(OrientationEstimate {
            pitch: 1.5,
            ..Default::default()
        });
        assert_eq!(reader.changed().await.map(|e| e.pitch), Some(1.5));

        drop(state);
        assert!(reader.changed().await.is_none());
    }
}
