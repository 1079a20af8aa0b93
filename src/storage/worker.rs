use super::retention::{RetentionPolicy, TrimReport};
use crate::error::{DoorcamError, Result};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Runs the retention policy once at start and then on a fixed period
pub struct RetentionWorker {
    policy: RetentionPolicy,
    root: PathBuf,
    period: Duration,
    last_report: Arc<Mutex<Option<TrimReport>>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RetentionWorker {
    pub fn new(policy: RetentionPolicy, root: impl Into<PathBuf>, period: Duration) -> Self {
        Self {
            policy,
            root: root.into(),
            period,
            last_report: Arc::new(Mutex::new(None)),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }

        info!(
            "Starting retention worker for {} (horizon {:?}, every {:?})",
            self.root.display(),
            self.policy.horizon(),
            self.period
        );

        self.cancel = CancellationToken::new();
        let cancel = self.cancel.clone();
        let policy = self.policy.clone();
        let root = self.root.clone();
        let period = self.period;
        let last_report = Arc::clone(&self.last_report);

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match policy.trim(&root, SystemTime::now()).await {
                            Ok(report) => {
                                info!(
                                    "Retention pass: {} scanned, {} removed, {} skipped, {} failed in {:?}",
                                    report.scanned,
                                    report.removed.len(),
                                    report.skipped,
                                    report.failed,
                                    report.duration
                                );
                                *last_report.lock() = Some(report);
                            }
                            Err(e) => error!("Retention pass failed: {}", e),
                        }
                    }
                }
            }

            info!("Retention worker stopped");
        }));
    }

    pub async fn stop(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        self.cancel.cancel();
        task.await
            .map_err(|e| DoorcamError::component("retention", e.to_string()))
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub fn last_report(&self) -> Option<TrimReport> {
        self.last_report.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::format_timestamp;

    #[tokio::test]
    async fn test_runs_at_start_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let expired = dir
            .path()
            .join(format_timestamp(SystemTime::now() - Duration::from_secs(3600)));
        std::fs::create_dir(&expired).unwrap();

        let mut worker = RetentionWorker::new(
            RetentionPolicy::new(Duration::from_secs(60)),
            dir.path(),
            Duration::from_secs(3600),
        );
        worker.start();
        assert!(worker.is_running());

        tokio::time::timeout(Duration::from_secs(5), async {
            while worker.last_report().is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(worker.last_report().unwrap().removed, vec![expired.clone()]);
        assert!(!expired.exists());

        worker.stop().await.unwrap();
        assert!(!worker.is_running());
    }
}
