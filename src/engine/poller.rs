//! 远端处理状态轮询
//!
//! 查询失败只发通知，不修改任务，下一轮会重新查询。

use std::sync::Arc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use crate::config::EngineConfig;
use crate::store::{Applied, JobStore, Transition};
use crate::traits::{Notifier, TaskStatusChecker};
use crate::types::{JobId, Notice, NoticeKind};

/// 手动触发的状态查询
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StatusCheckRequest {
    pub(crate) job_id: JobId,
    pub(crate) task_id: String,
}

pub(crate) struct StatusPoller {
    pub(crate) store: JobStore,
    pub(crate) checker: Arc<dyn TaskStatusChecker>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) config: Arc<EngineConfig>,
}

impl StatusPoller {
    pub(crate) async fn run(
        self,
        mut check_rx: mpsc::UnboundedReceiver<StatusCheckRequest>,
        shutdown: CancellationToken,
    ) {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Status poller started",
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Status poller shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
                Some(request) = check_rx.recv() => {
                    self.check(request.job_id, request.task_id).await;
                }
            }
        }
    }

    /// 一次轮询：检查所有 `processing_started` / `processing` 的任务
    pub(crate) async fn tick(&self) {
        let snapshot = self.store.awaiting_processing().await;
        if snapshot.is_empty() {
            return;
        }

        tracing::debug!(jobs = snapshot.len(), "Polling processing status");
        futures::stream::iter(snapshot)
            .for_each_concurrent(self.config.max_concurrent_status_checks, |(job_id, task_id)| async move {
                self.check(job_id, task_id).await;
            })
            .await;
    }

    pub(crate) async fn check(&self, job_id: JobId, task_id: String) -> Applied {
        let report = match self.checker.check_status(&task_id).await {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!(%job_id, %task_id, error = %err, "Status check failed");
                self.notifier.notify(Notice::new(
                    NoticeKind::StatusCheck,
                    Some(job_id),
                    format!("Unable to check task status: {}", err),
                ));
                return Applied::Ignored;
            }
        };

        let outcome = self.config.classify(&report);
        let applied = self
            .store
            .apply(Transition::ProcessingReport {
                id: job_id,
                task_id: task_id.clone(),
                processing: report.into(),
                outcome,
            })
            .await;

        if let Applied::Changed { from, to } = applied {
            if from != to {
                tracing::info!(%job_id, %task_id, %from, %to, "Processing status changed");
            }
        }

        applied
    }
}
