//! # Connectivity Monitor
//!
//! Debounced online/offline state fed by raw platform signals or a
//! reachability probe.
//!
//! ## Debouncing
//! ```text
//!  raw      ──┐ off ┌─on──┐off┌─on─────────────────────────────
//!             └─────┘     └───┘
//!  debounced──┐                    ┌──────────────────────────
//!             └────────────────────┘
//!                   │◄─ dwell ─►X  │◄─ dwell ─►│
//!                   flap cancels   recovery fires once
//! ```
//!
//! Going offline applies immediately. Coming back online waits for
//! `recovery_dwell` of uninterrupted online reports, so a flapping link does
//! not start a replay storm. Subscribers only see edges.
//!
//! Connectivity is a heuristic: the replay engine still treats a send
//! failure while "online" as a transient failure.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::remote::RemoteApi;

/// Edge notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

struct Inner {
    state_tx: watch::Sender<bool>,
    events: broadcast::Sender<ConnectivityEvent>,
    raw_online: AtomicBool,
    /// Bumped on every raw transition; a pending recovery only fires if the
    /// generation it started with is still current.
    generation: AtomicU64,
    dwell: Duration,
    forced_offline: bool,
}

/// Shared connectivity state. Cheap to clone.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool, dwell: Duration) -> Self {
        Self::build(initially_online, dwell, false)
    }

    /// A monitor that stays offline whatever is reported.
    pub fn forced_offline() -> Self {
        Self::build(false, Duration::ZERO, true)
    }

    pub fn from_config(config: &SyncConfig, initially_online: bool) -> Self {
        if config.connectivity.force_offline {
            info!("Connectivity forced offline by configuration");
            return Self::forced_offline();
        }
        Self::new(initially_online, config.recovery_dwell())
    }

    fn build(initially_online: bool, dwell: Duration, forced_offline: bool) -> Self {
        let (state_tx, _) = watch::channel(initially_online);
        let (events, _) = broadcast::channel(16);
        ConnectivityMonitor {
            inner: Arc::new(Inner {
                state_tx,
                events,
                raw_online: AtomicBool::new(initially_online),
                generation: AtomicU64::new(0),
                dwell,
                forced_offline,
            }),
        }
    }

    /// Debounced state.
    pub fn is_online(&self) -> bool {
        *self.inner.state_tx.borrow()
    }

    /// Level-triggered view of the debounced state.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.inner.state_tx.subscribe()
    }

    /// Edge-triggered events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.inner.events.subscribe()
    }

    /// Feeds a raw connectivity signal.
    pub fn report(&self, online: bool) {
        let inner = &self.inner;
        if inner.forced_offline {
            return;
        }

        let was_online = inner.raw_online.swap(online, Ordering::SeqCst);
        if was_online != online {
            inner.generation.fetch_add(1, Ordering::SeqCst);
        }

        if !online {
            self.apply(false);
            return;
        }
        if self.is_online() {
            return;
        }
        if was_online {
            // recovery already pending for this online stretch
            return;
        }

        let generation = inner.generation.load(Ordering::SeqCst);
        match Handle::try_current() {
            Ok(handle) if !inner.dwell.is_zero() => {
                debug!(dwell_ms = inner.dwell.as_millis() as u64, "Online signal, waiting for dwell");
                let monitor = self.clone();
                handle.spawn(async move {
                    tokio::time::sleep(monitor.inner.dwell).await;
                    monitor.finish_recovery(generation);
                });
            }
            _ => self.apply(true),
        }
    }

    fn finish_recovery(&self, generation: u64) {
        let inner = &self.inner;
        if inner.generation.load(Ordering::SeqCst) == generation
            && inner.raw_online.load(Ordering::SeqCst)
        {
            self.apply(true);
        }
    }

    fn apply(&self, online: bool) {
        let changed = self.inner.state_tx.send_if_modified(|state| {
            if *state == online {
                return false;
            }
            *state = online;
            true
        });
        if !changed {
            return;
        }

        let event = if online {
            info!("Connectivity restored");
            ConnectivityEvent::Online
        } else {
            info!("Connectivity lost");
            ConnectivityEvent::Offline
        };
        // no receivers is fine
        let _ = self.inner.events.send(event);
    }

    /// Runs `callback` on every online edge until the guard is dropped.
    pub fn on_online<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_event(ConnectivityEvent::Online, callback)
    }

    /// Runs `callback` on every offline edge until the guard is dropped.
    pub fn on_offline<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_event(ConnectivityEvent::Offline, callback)
    }

    fn on_event<F>(&self, wanted: ConnectivityEvent, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut events = self.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event == wanted => callback(),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Connectivity subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Subscription { task }
    }

    /// Pings the remote API every `interval` and reports the outcome.
    pub fn spawn_probe(&self, api: Arc<dyn RemoteApi>, interval: Duration) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reachable = api.ping().await.is_ok();
                debug!(reachable, "Connectivity probe");
                monitor.report(reachable);
            }
        })
    }
}

/// Callback registration. Delivery stops when dropped.
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const DWELL: Duration = Duration::from_millis(1_500);

    #[tokio::test(start_paused = true)]
    async fn test_offline_is_immediate_online_waits_for_dwell() {
        let monitor = ConnectivityMonitor::new(true, DWELL);
        let mut events = monitor.subscribe();

        monitor.report(false);
        assert!(!monitor.is_online());
        assert_eq!(events.try_recv().unwrap(), ConnectivityEvent::Offline);

        monitor.report(true);
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert!(!monitor.is_online());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(monitor.is_online());
        assert_eq!(events.try_recv().unwrap(), ConnectivityEvent::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flapping_restarts_dwell_and_fires_once() {
        let monitor = ConnectivityMonitor::new(false, DWELL);
        let mut events = monitor.subscribe();

        monitor.report(true);
        tokio::time::sleep(Duration::from_millis(500)).await;
        monitor.report(false);
        monitor.report(true);
        // repeated probes during the dwell do not restart it
        monitor.report(true);

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert!(!monitor.is_online());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(monitor.is_online());
        assert_eq!(events.try_recv().unwrap(), ConnectivityEvent::Online);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_callbacks_stop_after_guard_dropped() {
        let monitor = ConnectivityMonitor::new(false, Duration::ZERO);
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        let guard = monitor.on_online(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::task::yield_now().await;

        monitor.report(true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        drop(guard);
        monitor.report(false);
        monitor.report(true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_forced_offline_ignores_reports() {
        let mut config = SyncConfig::default();
        config.connectivity.force_offline = true;
        let monitor = ConnectivityMonitor::from_config(&config, true);
        monitor.report(true);
        assert!(!monitor.is_online());
    }
}
