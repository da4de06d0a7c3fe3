//! # Sync Agent
//!
//! Background task that decides WHEN the engine replays.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        SyncAgent loop                        │
//! │                                                              │
//! │  start ───────────────────────────► pass(Startup)            │
//! │                                                              │
//! │  select! {                                                   │
//! │    connectivity Online ───────────► pass(ConnectivityRestored)│
//! │    connectivity Offline ──────────► status only              │
//! │    background wake-up ────────────► pass(BackgroundSync)     │
//! │    handle.trigger / sync_now ─────► pass(..), reply          │
//! │    retry timer (report.retry_after) ► pass(RetryTimer)       │
//! │    shutdown ──────────────────────► stop probe, exit         │
//! │  }                                                           │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::background::BackgroundSyncSignal;
use crate::connectivity::ConnectivityEvent;
use crate::engine::{PassReport, SyncEngine, Trigger};
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteApi;
use crate::status::SyncStatus;

struct TriggerRequest {
    trigger: Trigger,
    reply: Option<oneshot::Sender<PassReport>>,
}

/// Configures and spawns the agent task.
pub struct SyncAgent {
    engine: Arc<SyncEngine>,
    background: Option<BackgroundSyncSignal>,
    probe: Option<(Arc<dyn RemoteApi>, Duration)>,
}

/// Handle for controlling a running [`SyncAgent`].
pub struct SyncAgentHandle {
    engine: Arc<SyncEngine>,
    trigger_tx: mpsc::Sender<TriggerRequest>,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SyncAgent {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        SyncAgent {
            engine,
            background: None,
            probe: None,
        }
    }

    /// Wake-ups from a [`ChannelBackgroundSync`](crate::background::ChannelBackgroundSync).
    pub fn with_background_signals(mut self, signal: BackgroundSyncSignal) -> Self {
        self.background = Some(signal);
        self
    }

    /// Polls `api.ping` to feed the connectivity monitor.
    pub fn with_probe(mut self, api: Arc<dyn RemoteApi>, interval: Duration) -> Self {
        self.probe = Some((api, interval));
        self
    }

    /// Spawns the agent on the current runtime.
    pub fn start(self) -> SyncAgentHandle {
        let (trigger_tx, trigger_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let engine = self.engine.clone();
        let task = tokio::spawn(self.run(trigger_rx, shutdown_rx));

        SyncAgentHandle {
            engine,
            trigger_tx,
            shutdown_tx,
            task,
        }
    }

    async fn run(
        self,
        mut trigger_rx: mpsc::Receiver<TriggerRequest>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        info!("Sync agent starting");
        let engine = self.engine;
        let connectivity = engine.connectivity().clone();
        let mut events = connectivity.subscribe();
        let mut background = self.background;
        let probe = self
            .probe
            .map(|(api, interval)| connectivity.spawn_probe(api, interval));

        let report = engine.process_offline_sync(Trigger::Startup).await;
        let mut retry_at = next_retry(&report, None);

        loop {
            let deadline = retry_at;
            let retry_timer = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => future::pending().await,
                }
            };

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Sync agent shutting down");
                    break;
                }

                event = events.recv() => {
                    let online = match event {
                        Ok(ConnectivityEvent::Online) => true,
                        Ok(ConnectivityEvent::Offline) => false,
                        Err(RecvError::Lagged(missed)) => {
                            warn!(missed, "Connectivity events lagged");
                            connectivity.is_online()
                        }
                        Err(RecvError::Closed) => {
                            events = connectivity.subscribe();
                            continue;
                        }
                    };
                    engine.status_tracker().set_online(online).await;
                    if online {
                        let report = engine.process_offline_sync(Trigger::ConnectivityRestored).await;
                        retry_at = next_retry(&report, retry_at);
                    }
                }

                Some(()) = next_signal(&mut background) => {
                    let report = engine.process_offline_sync(Trigger::BackgroundSync).await;
                    retry_at = next_retry(&report, retry_at);
                }

                Some(request) = trigger_rx.recv() => {
                    let report = engine.process_offline_sync(request.trigger).await;
                    retry_at = next_retry(&report, retry_at);
                    if let Some(reply) = request.reply {
                        // caller may have given up waiting
                        let _ = reply.send(report);
                    }
                }

                _ = retry_timer => {
                    debug!("Retry timer fired");
                    let report = engine.process_offline_sync(Trigger::RetryTimer).await;
                    retry_at = next_retry(&report, None);
                }
            }
        }

        if let Some(probe) = probe {
            probe.abort();
        }
        info!("Sync agent stopped");
    }
}

/// A coalesced report says nothing about the queue; keep the old timer.
fn next_retry(report: &PassReport, current: Option<Instant>) -> Option<Instant> {
    if report.coalesced {
        return current;
    }
    report.retry_after().map(|delay| Instant::now() + delay)
}

/// Never resolves once the platform side is gone.
async fn next_signal(signal: &mut Option<BackgroundSyncSignal>) -> Option<()> {
    if let Some(rx) = signal {
        if rx.recv().await.is_some() {
            return Some(());
        }
        debug!("Background sync signal closed");
        *signal = None;
    }
    future::pending().await
}

impl SyncAgentHandle {
    /// Queues a pass without waiting for it.
    pub async fn trigger(&self, trigger: Trigger) -> SyncResult<()> {
        self.trigger_tx
            .send(TriggerRequest {
                trigger,
                reply: None,
            })
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }

    /// Runs a manual pass and waits for its report.
    pub async fn sync_now(&self) -> SyncResult<PassReport> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.trigger_tx
            .send(TriggerRequest {
                trigger: Trigger::Manual,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| SyncError::ShuttingDown)?;
        reply_rx
            .await
            .map_err(|_| SyncError::ChannelError("Agent dropped the pass report".into()))
    }

    pub async fn status(&self) -> SyncStatus {
        self.engine.status().await
    }

    /// Stops the agent and waits for the task to finish.
    pub async fn shutdown(self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Shutdown channel closed".into()))?;
        self.task
            .await
            .map_err(|e| SyncError::ChannelError(format!("Agent task failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{offline_engine, unavailable, Endpoint, FakeRemote};
    use fieldquote_core::QuoteInput;

    async fn wait_for_empty_queue(engine: &SyncEngine) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !engine.queue().is_empty().await.unwrap() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("queue did not drain");
    }

    fn quote(title: &str) -> QuoteInput {
        QuoteInput {
            title: title.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_online_edge_drains_queue() {
        let remote = FakeRemote::new();
        let (engine, connectivity) = offline_engine(remote.clone());
        engine.writer().create_quote(quote("Deck")).await.unwrap();

        let handle = SyncAgent::new(engine.clone()).start();
        connectivity.report(true);
        wait_for_empty_queue(&engine).await;

        assert_eq!(remote.attempts(Endpoint::CreateQuote), 1);
        assert!(handle.status().await.is_online);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_retry_timer_resends_after_backoff() {
        let remote = FakeRemote::new();
        remote.fail_next(Endpoint::CreateQuote, unavailable(), 1);
        let (engine, connectivity) = offline_engine(remote.clone());
        engine.writer().create_quote(quote("Roof")).await.unwrap();

        let handle = SyncAgent::new(engine.clone()).start();
        connectivity.report(true);
        wait_for_empty_queue(&engine).await;

        // one failure, then the timer-driven resend
        assert_eq!(remote.attempts(Endpoint::CreateQuote), 2);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_sync_now_reports_and_shutdown_closes_handle() {
        let (engine, _) = offline_engine(FakeRemote::new());
        let handle = SyncAgent::new(engine).start();

        let report = handle.sync_now().await.unwrap();
        assert!(report.skipped_offline);

        let trigger_tx = handle.trigger_tx.clone();
        handle.shutdown().await.unwrap();
        assert!(trigger_tx
            .send(TriggerRequest {
                trigger: Trigger::Manual,
                reply: None,
            })
            .await
            .is_err());
    }
}
