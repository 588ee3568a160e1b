//! Change queue between the file watcher and the rebuild task.
//!
//! Producers never block. The single consumer takes everything pending as one
//! deduplicated batch, so changes that arrive while a rebuild runs are
//! applied together by the next one.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;

/// Event coalescing window.
pub const COALESCE_WINDOW: Duration = Duration::from_millis(50);

/// Create a queue. After the first path of a batch arrives the receiver waits
/// `window` for related events before draining.
#[must_use]
pub fn change_queue(window: Duration) -> (ChangeQueue, ChangeReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChangeQueue { tx }, ChangeReceiver { rx, window })
}

/// Sending half; cheap to clone.
#[derive(Debug, Clone)]
pub struct ChangeQueue {
    tx: mpsc::UnboundedSender<Vec<PathBuf>>,
}

impl ChangeQueue {
    /// Enqueue changed paths. Returns `false` once the receiver is gone.
    pub fn enqueue(&self, paths: impl IntoIterator<Item = PathBuf>) -> bool {
        let paths: Vec<PathBuf> = paths.into_iter().collect();
        if paths.is_empty() {
            return !self.tx.is_closed();
        }
        self.tx.send(paths).is_ok()
    }
}

/// Receiving half, owned by the rebuild task.
#[derive(Debug)]
pub struct ChangeReceiver {
    rx: mpsc::UnboundedReceiver<Vec<PathBuf>>,
    window: Duration,
}

impl ChangeReceiver {
    /// Wait for the next batch. `None` when every sender is dropped and the
    /// queue is drained.
    pub async fn next_batch(&mut self) -> Option<BTreeSet<PathBuf>> {
        let first = self.rx.recv().await?;
        let mut batch: BTreeSet<PathBuf> = first.into_iter().collect();

        if !self.window.is_zero() {
            tokio::time::sleep(self.window).await;
        }
        while let Ok(paths) = self.rx.try_recv() {
            batch.extend(paths);
        }
        Some(batch)
    }
}
