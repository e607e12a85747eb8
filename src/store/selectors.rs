use serde::Serialize;
use crate::types::{JobId, ProcessingState, UploadStatus};
use super::job::UploadJob;

/// 从任务记录推导出的只读进度视图
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressView {
    pub id: JobId,
    pub label: String,
    pub upload_percentage: Option<u8>,
    /// 远端没有提供百分比，始终为空
    pub processing_percentage: Option<u8>,
    pub status: UploadStatus,
    pub task_id: Option<String>,
    pub processing: Option<ProcessingState>,
    pub error: Option<String>,
}

pub fn progress_view(job: &UploadJob) -> ProgressView {
    ProgressView {
        id: job.id,
        label: job.name.clone(),
        upload_percentage: job.progress.and_then(|p| p.percentage()),
        processing_percentage: None,
        status: job.status,
        task_id: job.task_id.clone(),
        processing: job.processing.clone(),
        error: job.error.clone(),
    }
}

/// 按创建时间排序
pub fn progress_views<'a>(jobs: impl IntoIterator<Item = &'a UploadJob>) -> Vec<ProgressView> {
    let mut jobs: Vec<&UploadJob> = jobs.into_iter().collect();
    jobs.sort_by_key(|job| job.created_at);
    jobs.into_iter().map(progress_view).collect()
}
