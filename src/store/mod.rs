//! 任务记录存储：提交时插入，只通过 [`Transition`] 修改，只由 [`JobStore::sweep_terminal`] 删除

mod job;
mod selectors;
mod transition;

pub use job::{UploadJob, UploadRequest};
pub use selectors::{progress_view, progress_views, ProgressView};
pub use transition::{Applied, Transition};

use std::collections::HashMap;
use std::sync::Arc;
use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use crate::types::{EngineEvent, JobId, ProcessingState, TransferProgress, UploadStatus};

#[derive(Clone)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<JobId, UploadJob>>>,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl JobStore {
    pub fn new(event_tx: broadcast::Sender<EngineEvent>) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
        }
    }

    /// 初始插入，唯一一次整体写入记录
    pub async fn insert(&self, job: UploadJob) {
        let job_id = job.id;
        let name = job.name.clone();
        self.jobs.write().await.insert(job_id, job);

        let _ = self.event_tx.send(EngineEvent::Admitted { job_id, name });
    }

    /// 应用一次状态变更。任务不存在或当前状态不允许时为 no-op。
    pub async fn apply(&self, transition: Transition) -> Applied {
        let id = transition.id();
        let to = transition.target();

        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&id) else {
            tracing::debug!(job_id = %id, ?transition, "Transition on missing job ignored");
            return Applied::Ignored;
        };

        let from = job.status;
        if !from.can_transition_to(to) {
            tracing::debug!(job_id = %id, %from, %to, "Transition not permitted, ignored");
            return Applied::Ignored;
        }

        match transition {
            Transition::Claim { .. } => {
                job.started_at = Some(Utc::now());
            }
            Transition::TransferStarted { .. } => {}
            Transition::Progress { loaded, total, .. } => {
                job.progress = Some(TransferProgress { loaded, total });
                let _ = self.event_tx.send(EngineEvent::Progress { job_id: id, loaded, total });
            }
            Transition::TransferFinished { .. } => {
                // 成功时进度补满，以免最后一次进度事件没有到 100%
                if let Some(progress) = job.progress.as_mut() {
                    progress.loaded = progress.total.max(progress.loaded);
                }
                job.completed_at = Some(Utc::now());
            }
            Transition::TransferFailed { error, .. } => {
                job.error = Some(error);
                job.completed_at = Some(Utc::now());
            }
            Transition::ProcessingStarted { task_id, .. } => {
                if job.task_id.is_some() {
                    tracing::warn!(job_id = %id, "Task id already assigned, ignored");
                    return Applied::Ignored;
                }
                job.task_id = Some(task_id);
                job.processing = Some(ProcessingState {
                    status: Some(UploadStatus::ProcessingStarted.to_string()),
                    error: None,
                });
            }
            Transition::ProcessingKickoffFailed { error, .. } => {
                job.processing = Some(ProcessingState {
                    status: None,
                    error: Some(error.clone()),
                });
                job.error = Some(error);
            }
            Transition::ProcessingReport { task_id, processing, .. } => {
                if job.task_id.as_deref() != Some(task_id.as_str()) {
                    tracing::debug!(job_id = %id, %task_id, "Report for another task ignored");
                    return Applied::Ignored;
                }
                if let Some(error) = &processing.error {
                    job.error = Some(error.clone());
                }
                job.processing = Some(processing);
            }
        }

        job.status = to;
        if !to.is_transferring() {
            // 传输阶段结束后取消句柄不再有意义
            job.cancel = None;
        }
        drop(jobs);

        if from != to {
            let _ = self.event_tx.send(EngineEvent::StatusChanged { job_id: id, from, to });
        }

        Applied::Changed { from, to }
    }

    pub async fn get(&self, id: &JobId) -> Option<UploadJob> {
        self.jobs.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &JobId) -> bool {
        self.jobs.read().await.contains_key(id)
    }

    /// 所有任务，按创建时间排序
    pub async fn list(&self) -> Vec<UploadJob> {
        let mut jobs: Vec<_> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    pub async fn progress_views(&self) -> Vec<ProgressView> {
        progress_views(self.jobs.read().await.values())
    }

    /// 快照：所有等待远端处理结果的任务 `(id, task_id)`
    pub async fn awaiting_processing(&self) -> Vec<(JobId, String)> {
        self.jobs
            .read()
            .await
            .values()
            .filter(|job| job.status.awaits_processing())
            .filter_map(|job| job.task_id.clone().map(|task_id| (job.id, task_id)))
            .collect()
    }

    /// 当前状态和取消句柄，离开传输阶段后句柄为 `None`
    pub async fn cancel_handle(&self, id: &JobId) -> Option<(UploadStatus, Option<CancellationToken>)> {
        self.jobs
            .read()
            .await
            .get(id)
            .map(|job| (job.status, job.cancel.clone()))
    }

    /// 清除所有已结束的任务，返回被删除的 ID
    pub async fn sweep_terminal(&self) -> Vec<JobId> {
        let mut jobs = self.jobs.write().await;
        let swept: Vec<JobId> = jobs
            .values()
            .filter(|job| job.status.is_terminal())
            .map(|job| job.id)
            .collect();

        for id in &swept {
            jobs.remove(id);
        }
        drop(jobs);

        if !swept.is_empty() {
            let _ = self.event_tx.send(EngineEvent::Swept { job_ids: swept.clone() });
        }

        swept
    }
}
