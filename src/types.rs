use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 上传任务唯一标识，提交时生成，永不复用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 上传状态
///
/// ```text
/// queued -> fetching -> uploading -> finished -> processing_started -> processing -> processing_finished
///              |            |            |               |                  |
///              +-> failed <-+            +-> processing_failed <------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    /// 等待中（在队列中）
    Queued,
    /// 已被 worker 领取
    Fetching,
    /// 上传中
    Uploading,
    /// 上传完成
    Finished,
    /// 上传失败
    Failed,
    /// 远端处理已启动
    ProcessingStarted,
    /// 远端处理中
    Processing,
    /// 远端处理完成
    ProcessingFinished,
    /// 远端处理失败
    ProcessingFailed,
}

impl UploadStatus {
    /// 没有任何出边的状态
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadStatus::Failed | UploadStatus::ProcessingFinished | UploadStatus::ProcessingFailed
        )
    }

    /// 等待轮询的状态
    pub fn awaits_processing(self) -> bool {
        matches!(self, UploadStatus::ProcessingStarted | UploadStatus::Processing)
    }

    /// 是否处于传输阶段
    pub fn is_transferring(self) -> bool {
        matches!(self, UploadStatus::Fetching | UploadStatus::Uploading)
    }

    pub fn can_transition_to(self, next: UploadStatus) -> bool {
        use UploadStatus::*;

        matches!(
            (self, next),
            (Queued, Fetching)
                | (Fetching, Uploading)
                | (Fetching, Failed)
                | (Uploading, Uploading)
                | (Uploading, Finished)
                | (Uploading, Failed)
                | (Finished, ProcessingStarted)
                | (Finished, ProcessingFailed)
                | (ProcessingStarted, Processing)
                | (ProcessingStarted, ProcessingFinished)
                | (ProcessingStarted, ProcessingFailed)
                | (Processing, Processing)
                | (Processing, ProcessingFinished)
                | (Processing, ProcessingFailed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UploadStatus::Queued => "queued",
            UploadStatus::Fetching => "fetching",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Finished => "finished",
            UploadStatus::Failed => "failed",
            UploadStatus::ProcessingStarted => "processing_started",
            UploadStatus::Processing => "processing",
            UploadStatus::ProcessingFinished => "processing_finished",
            UploadStatus::ProcessingFailed => "processing_failed",
        }
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 传输进度 (loaded, total)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TransferProgress {
    pub loaded: u64,
    pub total: u64,
}

impl TransferProgress {
    pub fn percentage(&self) -> Option<u8> {
        if self.total == 0 {
            return None;
        }

        let ratio = self.loaded.min(self.total) as f64 / self.total as f64;
        Some((ratio * 100.0).round() as u8)
    }
}

/// 远端处理的子状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProcessingState {
    pub status: Option<String>,
    pub error: Option<String>,
}

/// 暂存结果：上传地址和处理 key
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StagedAsset {
    pub url: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProcessingTask {
    #[serde(rename = "taskId")]
    pub task_id: String,
}

/// 状态查询返回
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct StatusReport {
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl From<StatusReport> for ProcessingState {
    fn from(report: StatusReport) -> Self {
        Self {
            status: report.status,
            error: report.error,
        }
    }
}

/// 单个任务传输通道上的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    Progress {
        loaded: u64,
        total: u64,
    },
    Finished,
    Failure {
        error: String,
    },
}

impl TransferEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferEvent::Progress { .. })
    }
}

/// 引擎对外广播的事件
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// 任务已提交
    Admitted {
        job_id: JobId,
        name: String,
    },

    /// 状态变更
    StatusChanged {
        job_id: JobId,
        from: UploadStatus,
        to: UploadStatus,
    },

    /// 传输进度
    Progress {
        job_id: JobId,
        loaded: u64,
        total: u64,
    },

    /// 终态任务被清理
    Swept {
        job_ids: Vec<JobId>,
    },
}

impl EngineEvent {
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            EngineEvent::Admitted { job_id, .. }
            | EngineEvent::StatusChanged { job_id, .. }
            | EngineEvent::Progress { job_id, .. } => Some(*job_id),
            EngineEvent::Swept { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Admission,
    Transfer,
    ProcessingKickoff,
    StatusCheck,
}

/// 面向用户的错误通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub job_id: Option<JobId>,
    pub message: String,
}

impl Notice {
    pub fn new(kind: NoticeKind, job_id: Option<JobId>, message: impl Into<String>) -> Self {
        Self {
            kind,
            job_id,
            message: message.into(),
        }
    }
}

// 静态断言确保类型是 Send 的
const _: () = {
    fn assert_send<T: Send + Sync>() {}
    fn assert_types() {
        assert_send::<EngineEvent>();
        assert_send::<TransferEvent>();
        assert_send::<Notice>();
    }
};
