//! Platform background-sync registration.
//!
//! Best effort: a platform that cannot wake the app only loses timeliness.
//! The connectivity monitor's online edge remains the fallback trigger.

use tokio::sync::mpsc;
use tracing::debug;

/// Requests a wake-up when pending work can be retried.
pub trait BackgroundSync: Send + Sync {
    /// Returns whether the platform accepted the request.
    fn register(&self) -> bool;
}

/// No background capability.
pub struct NoopBackgroundSync;

impl BackgroundSync for NoopBackgroundSync {
    fn register(&self) -> bool {
        false
    }
}

/// Receiving end of [`ChannelBackgroundSync`], consumed by the sync agent.
pub type BackgroundSyncSignal = mpsc::Receiver<()>;

/// In-process background sync: registration wakes the agent.
pub struct ChannelBackgroundSync {
    tx: mpsc::Sender<()>,
}

impl ChannelBackgroundSync {
    /// Registrations coalesce: at most one wake-up is ever pending.
    pub fn channel() -> (Self, BackgroundSyncSignal) {
        let (tx, rx) = mpsc::channel(1);
        (ChannelBackgroundSync { tx }, rx)
    }
}

impl BackgroundSync for ChannelBackgroundSync {
    fn register(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            // a wake-up is already pending
            Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => {
                debug!("Background sync receiver gone");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registrations_coalesce() {
        let (sync, mut signal) = ChannelBackgroundSync::channel();
        assert!(sync.register());
        assert!(sync.register());

        assert!(signal.try_recv().is_ok());
        assert!(signal.try_recv().is_err());

        drop(signal);
        assert!(!sync.register());
        assert!(!NoopBackgroundSync.register());
    }
}
