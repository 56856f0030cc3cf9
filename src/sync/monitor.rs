//! Health monitor: decides whether the backend is reachable.
//!
//! A link coming up or a `NETWORK_ONLINE` notification only triggers a probe;
//! connectivity goes online when the health endpoint answers. Going down is
//! trusted immediately. An offline to online transition drains the queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::engine::{SyncEngine, SyncOutcome};
use crate::api::TodoApi;
use crate::config::SyncConfig;
use crate::network::{LinkState, NetworkLink};
use crate::offline::OfflineStorage;
use crate::todos::model::Connectivity;
use crate::worker::WorkerNotification;

pub struct HealthMonitor {
    api: Arc<dyn TodoApi>,
    engine: Arc<SyncEngine>,
    storage: Arc<OfflineStorage>,
    link: NetworkLink,
    interval: Duration,
    probe_timeout: Duration,
    auto_sync: bool,
}

impl HealthMonitor {
    pub fn new(
        api: Arc<dyn TodoApi>,
        engine: Arc<SyncEngine>,
        storage: Arc<OfflineStorage>,
        link: NetworkLink,
        config: &SyncConfig,
    ) -> Self {
        Self {
            api,
            engine,
            storage,
            link,
            interval: config.health_interval,
            probe_timeout: config.health_timeout,
            auto_sync: config.auto_sync_on_reconnect,
        }
    }

    /// Hit the health endpoint once and apply the verdict.
    pub async fn probe(&self) -> Connectivity {
        let reachable = match tokio::time::timeout(self.probe_timeout, self.api.health_check()).await
        {
            Ok(Ok(report)) => report.success,
            Ok(Err(e)) => {
                debug!(error = %e, "Health check failed");
                false
            }
            Err(_) => {
                debug!(timeout = ?self.probe_timeout, "Health check timed out");
                false
            }
        };

        let next = if reachable {
            Connectivity::Online
        } else {
            Connectivity::Offline
        };
        self.apply(next).await;
        next
    }

    pub async fn handle_link(&self, state: LinkState) {
        match state {
            LinkState::Up => {
                self.probe().await;
            }
            LinkState::Down => self.apply(Connectivity::Offline).await,
        }
    }

    pub async fn handle_notification(&self, notification: WorkerNotification) {
        match notification {
            WorkerNotification::NetworkOnline => {
                self.probe().await;
            }
            WorkerNotification::NetworkOffline => self.apply(Connectivity::Offline).await,
        }
    }

    async fn apply(&self, next: Connectivity) {
        let previous = self.engine.set_connectivity(next);
        if previous != Some(Connectivity::Offline) || next != Connectivity::Online {
            return;
        }
        if !self.auto_sync {
            return;
        }

        info!("Back online, syncing offline changes");
        match self.engine.sync_offline_data().await {
            Ok(SyncOutcome::Synced { operations, .. }) => {
                info!(operations, "Reconnect sync complete");
            }
            Ok(outcome) => debug!(?outcome, "Reconnect sync had nothing to do"),
            Err(e) => warn!(error = %e, "Reconnect sync failed"),
        }
    }

    /// Run the monitor on its own task.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Probe immediately, then on every tick, link change and worker notification.
    pub async fn run(self: Arc<Self>) {
        let mut link_rx = self.link.subscribe();
        link_rx.borrow_and_update();
        let mut notifications = self.storage.subscribe_notifications().await;
        let mut notifications_open = true;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval = ?self.interval, "Health monitor started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe().await;
                }

                changed = link_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *link_rx.borrow_and_update();
                    self.handle_link(state).await;
                }

                msg = notifications.recv(), if notifications_open => {
                    match msg {
                        Ok(notification) => self.handle_notification(notification).await,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Missed worker notifications, re-probing");
                            self.probe().await;
                        }
                        Err(RecvError::Closed) => {
                            warn!("Worker notifications closed");
                            notifications_open = false;
                        }
                    }
                }
            }
        }
        info!("Health monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlStore;
    use crate::sync::stub::StubApi;

    struct Harness {
        api: Arc<StubApi>,
        engine: Arc<SyncEngine>,
        storage: Arc<OfflineStorage>,
        link: NetworkLink,
        monitor: Arc<HealthMonitor>,
    }

    fn harness(config: SyncConfig) -> Harness {
        let api = Arc::new(StubApi::new());
        let link = NetworkLink::default();
        let storage = Arc::new(OfflineStorage::new(
            Arc::new(LibSqlStore::in_memory()),
            link.clone(),
            Duration::from_secs(2),
        ));
        let engine = Arc::new(SyncEngine::new(api.clone(), Arc::clone(&storage), &config));
        let monitor = Arc::new(HealthMonitor::new(
            api.clone(),
            Arc::clone(&engine),
            Arc::clone(&storage),
            link.clone(),
            &config,
        ));
        Harness {
            api,
            engine,
            storage,
            link,
            monitor,
        }
    }

    fn fast_config() -> SyncConfig {
        SyncConfig {
            request_timeout: Duration::from_millis(100),
            health_timeout: Duration::from_millis(100),
            health_interval: Duration::from_secs(3600),
            ..SyncConfig::default()
        }
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn probe_sets_connectivity() {
        let h = harness(fast_config());

        assert_eq!(h.monitor.probe().await, Connectivity::Online);
        h.api.set_down(true);
        assert_eq!(h.monitor.probe().await, Connectivity::Offline);
        assert_eq!(h.engine.connectivity(), Connectivity::Offline);
    }

    #[tokio::test]
    async fn hanging_probe_times_out_offline() {
        let h = harness(fast_config());
        h.api.set_hang(true);
        assert_eq!(h.monitor.probe().await, Connectivity::Offline);
    }

    #[tokio::test]
    async fn link_up_is_verified_by_probe() {
        let h = harness(fast_config());
        h.engine.set_connectivity(Connectivity::Offline);
        h.api.set_down(true);

        h.monitor.handle_link(LinkState::Up).await;
        assert_eq!(h.engine.connectivity(), Connectivity::Offline);

        h.api.set_down(false);
        h.monitor.handle_link(LinkState::Up).await;
        assert_eq!(h.engine.connectivity(), Connectivity::Online);
    }

    #[tokio::test]
    async fn offline_signals_are_trusted() {
        let h = harness(fast_config());
        let before = h.api.health_calls.load(std::sync::atomic::Ordering::SeqCst);

        h.monitor.handle_link(LinkState::Down).await;
        assert_eq!(h.engine.connectivity(), Connectivity::Offline);

        h.engine.set_connectivity(Connectivity::Online);
        h.monitor
            .handle_notification(WorkerNotification::NetworkOffline)
            .await;
        assert_eq!(h.engine.connectivity(), Connectivity::Offline);

        let after = h.api.health_calls.load(std::sync::atomic::Ordering::SeqCst);
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn reconnect_drains_queue() {
        let h = harness(fast_config());
        h.engine.set_connectivity(Connectivity::Offline);
        h.engine.add_todo("queued").await.unwrap();
        assert_eq!(h.storage.get_sync_queue().await.unwrap().len(), 1);

        h.monitor
            .handle_notification(WorkerNotification::NetworkOnline)
            .await;

        assert!(h.engine.is_online());
        assert!(h.storage.get_sync_queue().await.unwrap().is_empty());
        assert_eq!(h.api.server_todos().len(), 1);
    }

    #[tokio::test]
    async fn reconnect_without_auto_sync_keeps_queue() {
        let h = harness(SyncConfig {
            auto_sync_on_reconnect: false,
            ..fast_config()
        });
        h.engine.set_connectivity(Connectivity::Offline);
        h.engine.add_todo("queued").await.unwrap();

        h.monitor.probe().await;
        assert!(h.engine.is_online());
        assert_eq!(h.storage.get_sync_queue().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn running_monitor_follows_link() {
        let h = harness(fast_config());
        h.api.set_down(true);
        let task = Arc::clone(&h.monitor).spawn();

        // Immediate probe at start.
        let engine = Arc::clone(&h.engine);
        wait_for(|| !engine.is_online()).await;

        h.api.set_down(false);
        h.link.set(LinkState::Down);
        h.link.set(LinkState::Up);
        wait_for(|| engine.is_online()).await;

        task.abort();
    }
}
