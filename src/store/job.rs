use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use crate::types::{JobId, ProcessingState, TransferProgress, UploadStatus};

/// 上传任务记录，由 [`JobStore`](super::JobStore) 独占
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadJob {
    pub id: JobId,
    /// 显示名称
    pub name: String,
    /// 上传目标地址
    pub url: String,
    /// 远端处理用的 key
    pub processing_key: String,
    /// 远端处理任务 ID，赋值后不可变
    pub task_id: Option<String>,
    pub progress: Option<TransferProgress>,
    pub processing: Option<ProcessingState>,
    pub status: UploadStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub cancel: Option<CancellationToken>,
}

impl UploadJob {
    pub(crate) fn new(request: &UploadRequest) -> Self {
        Self {
            id: request.job_id,
            name: request.name.clone(),
            url: request.url.clone(),
            processing_key: request.processing_key.clone(),
            task_id: None,
            progress: None,
            processing: None,
            status: UploadStatus::Queued,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            cancel: Some(request.cancel.clone()),
        }
    }
}

/// 提交参数，队列里只放它的 `Arc`
#[derive(Debug)]
pub struct UploadRequest {
    pub job_id: JobId,
    pub name: String,
    pub url: String,
    pub processing_key: String,
    pub payload: Bytes,
    pub cancel: CancellationToken,
}

impl UploadRequest {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        processing_key: impl Into<String>,
        payload: Bytes,
    ) -> Self {
        Self {
            job_id: JobId::new(),
            name: name.into(),
            url: url.into(),
            processing_key: processing_key.into(),
            payload,
            cancel: CancellationToken::new(),
        }
    }
}
