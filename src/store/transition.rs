use crate::config::ProcessingOutcome;
use crate::types::{JobId, ProcessingState, UploadStatus};

/// 对任务记录的所有合法修改
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// worker 领取任务
    Claim {
        id: JobId,
    },

    /// 传输开始
    TransferStarted {
        id: JobId,
    },

    Progress {
        id: JobId,
        loaded: u64,
        total: u64,
    },

    TransferFinished {
        id: JobId,
    },

    TransferFailed {
        id: JobId,
        error: String,
    },

    /// 远端处理已受理
    ProcessingStarted {
        id: JobId,
        task_id: String,
    },

    /// 启动远端处理的请求本身失败
    ProcessingKickoffFailed {
        id: JobId,
        error: String,
    },

    /// 轮询结果，`task_id` 必须与任务上记录的一致
    ProcessingReport {
        id: JobId,
        task_id: String,
        processing: ProcessingState,
        outcome: ProcessingOutcome,
    },
}

impl Transition {
    pub fn id(&self) -> JobId {
        match self {
            Transition::Claim { id }
            | Transition::TransferStarted { id }
            | Transition::Progress { id, .. }
            | Transition::TransferFinished { id }
            | Transition::TransferFailed { id, .. }
            | Transition::ProcessingStarted { id, .. }
            | Transition::ProcessingKickoffFailed { id, .. }
            | Transition::ProcessingReport { id, .. } => *id,
        }
    }

    pub fn target(&self) -> UploadStatus {
        match self {
            Transition::Claim { .. } => UploadStatus::Fetching,
            Transition::TransferStarted { .. } | Transition::Progress { .. } => UploadStatus::Uploading,
            Transition::TransferFinished { .. } => UploadStatus::Finished,
            Transition::TransferFailed { .. } => UploadStatus::Failed,
            Transition::ProcessingStarted { .. } => UploadStatus::ProcessingStarted,
            Transition::ProcessingKickoffFailed { .. } => UploadStatus::ProcessingFailed,
            Transition::ProcessingReport { outcome, .. } => match outcome {
                ProcessingOutcome::InProgress => UploadStatus::Processing,
                ProcessingOutcome::Completed => UploadStatus::ProcessingFinished,
                ProcessingOutcome::Failed => UploadStatus::ProcessingFailed,
            },
        }
    }
}

/// 一次 transition 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Changed {
        from: UploadStatus,
        to: UploadStatus,
    },
    /// 前置条件不满足或任务不存在，未做任何修改
    Ignored,
}

impl Applied {
    pub fn is_changed(&self) -> bool {
        matches!(self, Applied::Changed { .. })
    }
}
