//! Periodic refresh of the archive indices.
//!
//! A refresh cycle fetches and rebuilds every configured archive in turn.
//! Failures are isolated per archive: a broken feed leaves that archive's
//! previous namespace serving and does not stop the other archives from
//! refreshing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::builder::{BuildReport, IndexBuilder};
use crate::config::FeedConfig;
use crate::error::{IndexError, IndexResult};
use crate::fetch::FeedFetcher;

/// Outcome of one refresh cycle, per archive.
pub type RefreshReport = BTreeMap<String, IndexResult<BuildReport>>;

/// Drives fetcher and builder for the configured archives.
pub struct Refresher {
    archives: BTreeMap<String, FeedConfig>,
    fetcher: FeedFetcher,
    builder: Arc<IndexBuilder>,
}

impl Refresher {
    /// Create a refresher for `archives`.
    pub fn new(
        archives: BTreeMap<String, FeedConfig>,
        fetcher: FeedFetcher,
        builder: Arc<IndexBuilder>,
    ) -> Self {
        Self {
            archives,
            fetcher,
            builder,
        }
    }

    /// Fetch and rebuild a single archive.
    pub async fn refresh_archive(&self, archive: &str) -> IndexResult<BuildReport> {
        let feed = self.archives.get(archive).ok_or_else(|| {
            IndexError::Configuration(format!("Unknown archive: {}", archive))
        })?;

        info!("Updating {} from {}", archive, feed.url);
        let entries = self.fetcher.fetch(feed).await?;
        let report = self.builder.build(archive, entries).await?;
        info!(
            "{} took {:.1}s ({} entries, {} path/package pairs)",
            archive,
            report.elapsed.as_secs_f64(),
            report.entries,
            report.pairs
        );
        Ok(report)
    }

    /// Refresh every archive once.
    ///
    /// Only a fatal store error is returned as an error; every other failure
    /// is logged and recorded in the report.
    pub async fn refresh_all(&self) -> IndexResult<RefreshReport> {
        let mut report = RefreshReport::new();
        for archive in self.archives.keys() {
            match self.refresh_archive(archive).await {
                Ok(build) => {
                    report.insert(archive.clone(), Ok(build));
                }
                Err(e) if e.is_fatal() => {
                    error!("Refresh of {} hit a store failure: {}", archive, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        "Refresh of {} failed, keeping previous index: {}",
                        archive, e
                    );
                    report.insert(archive.clone(), Err(e));
                }
            }
        }

        let failed = report.values().filter(|r| r.is_err()).count();
        info!(
            "Refresh cycle finished: {} updated, {} failed",
            report.len() - failed,
            failed
        );
        Ok(report)
    }
}

/// Background task refreshing all archives on a fixed interval.
pub struct PeriodicRefresh {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl PeriodicRefresh {
    /// Start refreshing every `period`, the first cycle one period from now.
    pub fn start(refresher: Arc<Refresher>, period: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);

        let handle = tokio::spawn(async move {
            info!(
                "Starting periodic refresh service (interval: {}s)",
                period.as_secs()
            );
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Refresh service received shutdown signal");
                        break;
                    }
                    _ = interval.tick() => {
                        debug!("Running periodic refresh");
                        tokio::select! {
                            _ = shutdown_rx.recv() => {
                                info!("Refresh service received shutdown signal, abandoning cycle");
                                break;
                            }
                            result = refresher.refresh_all() => {
                                if let Err(e) = result {
                                    error!("Stopping periodic refresh: {}", e);
                                    break;
                                }
                            }
                        }
                    }
                }
            }

            info!("Periodic refresh service stopped");
        });

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Signal the task to stop and wait for it.
    ///
    /// A cycle that is in progress is abandoned at its next suspension point;
    /// its unpublished namespace is removed on the next startup.
    pub async fn stop(self) {
        if self.shutdown_tx.send(()).is_err() {
            debug!("Refresh service already stopped");
        }
        if let Err(e) = self.handle.await {
            warn!("Refresh task completed with error: {}", e);
        }
    }
}
