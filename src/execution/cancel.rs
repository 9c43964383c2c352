//! Cooperative cancellation shared by a run and everything under it

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

/// Cancellation flag passed down run -> scheduler -> instance -> step.
///
/// Records the moment cancellation was first requested so a step that
/// completes afterwards can still be classified as cancelled.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    requested: Arc<watch::Sender<Option<Instant>>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            requested: Arc::new(tx),
        }
    }

    /// Request cancellation; later calls keep the first timestamp
    pub fn cancel(&self) {
        self.requested.send_if_modified(|requested| {
            if requested.is_none() {
                *requested = Some(Instant::now());
                true
            } else {
                false
            }
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.requested.borrow().is_some()
    }

    pub fn requested_at(&self) -> Option<Instant> {
        *self.requested.borrow()
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        let mut rx = self.requested.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel
        let _ = rx.wait_for(Option::is_some).await;
    }
}
