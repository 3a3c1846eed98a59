use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use crate::error::Result;
use crate::refresher::LabelMetricsRefresher;

/// Drives refresh cycles until shut down.
pub struct Scheduler {
    refresher: LabelMetricsRefresher,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(refresher: LabelMetricsRefresher, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            refresher,
            shutdown,
        }
    }

    /// Without `daemonize`, runs a single cycle. Otherwise runs a cycle, waits
    /// `interval` and repeats. The wait starts when a cycle ends, so an
    /// overrunning cycle just delays the next one.
    ///
    /// Only a fatal label resolution error ends the loop early.
    pub async fn run(mut self, daemonize: bool, interval: Duration) -> Result<()> {
        if !daemonize {
            return self.refresh_once().await;
        }

        loop {
            self.refresh_once().await?;

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.shutdown.changed() => {
                    info!("Refresh loop stopping");
                    return Ok(());
                }
            }
        }
    }

    async fn refresh_once(&self) -> Result<()> {
        match self.refresher.refresh_all().await {
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::error!("Refresh cycle failed: {}", e);
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }
}
