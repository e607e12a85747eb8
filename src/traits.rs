use async_trait::async_trait;
use bytes::Bytes;
use super::errors::Result;
use super::progress::ProgressEmitter;
use super::types::{Notice, ProcessingTask, StagedAsset, StatusReport};

/// 获取上传地址和处理 key
#[async_trait]
pub trait StageRequester: Send + Sync {
    async fn stage(&self) -> Result<StagedAsset>;
}

/// 执行实际的字节传输
#[async_trait]
pub trait TransferExecutor: Send + Sync {
    /// 上传 `payload` 到 `url`，过程中通过 `progress` 上报 `{loaded, total}`。
    ///
    /// 返回 `Ok(())` 代表传输成功，任何错误都会让任务进入 `failed`。
    async fn transfer(&self, url: &str, payload: Bytes, progress: ProgressEmitter) -> Result<()>;
}

/// 启动远端处理
#[async_trait]
pub trait RemoteProcessor: Send + Sync {
    async fn start_processing(&self, key: &str) -> Result<ProcessingTask>;
}

/// 查询远端处理状态
#[async_trait]
pub trait TaskStatusChecker: Send + Sync {
    async fn check_status(&self, task_id: &str) -> Result<StatusReport>;
}

/// 用户可见的错误通知
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// 默认通知实现：写入日志
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match notice.job_id {
            Some(job_id) => tracing::warn!(
                kind = ?notice.kind,
                %job_id,
                "{}", notice.message
            ),
            None => tracing::warn!(kind = ?notice.kind, "{}", notice.message),
        }
    }
}
