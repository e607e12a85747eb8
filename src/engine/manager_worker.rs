use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use crate::errors::{Result, UploadError};
use crate::store::{JobStore, UploadJob, UploadRequest};
use crate::types::JobId;
use super::poller::StatusCheckRequest;
use super::queue::JobQueue;

/// 引擎命令
pub(crate) enum EngineCommand {
    /// 提交上传任务
    Submit {
        request: UploadRequest,
        reply: oneshot::Sender<JobId>,
    },

    /// 取消任务
    Cancel {
        job_id: JobId,
        reply: oneshot::Sender<Result<bool>>,
    },

    /// 手动触发状态查询
    RequestStatusCheck {
        job_id: JobId,
        task_id: String,
        reply: oneshot::Sender<Result<()>>,
    },

    /// 清除所有已结束的任务
    SweepTerminal {
        reply: oneshot::Sender<Vec<JobId>>,
    },
}

/// 接收命令的主循环，所有提交都经过这里按顺序入队
pub(crate) struct AdmissionLoop {
    pub(crate) store: JobStore,
    pub(crate) queue: JobQueue,
    pub(crate) check_tx: mpsc::UnboundedSender<StatusCheckRequest>,
}

impl AdmissionLoop {
    pub(crate) async fn run(
        self,
        mut command_rx: mpsc::UnboundedReceiver<EngineCommand>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = command_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
            }
        }

        tracing::debug!("Admission loop stopped");
    }

    async fn handle_command(&self, command: EngineCommand) {
        match command {
            EngineCommand::Submit { request, reply } => {
                let job_id = self.admit(request).await;
                let _ = reply.send(job_id);
            }
            EngineCommand::Cancel { job_id, reply } => {
                let _ = reply.send(self.cancel(job_id).await);
            }
            EngineCommand::RequestStatusCheck { job_id, task_id, reply } => {
                let _ = reply.send(self.request_status_check(job_id, task_id).await);
            }
            EngineCommand::SweepTerminal { reply } => {
                let swept = self.store.sweep_terminal().await;
                if !swept.is_empty() {
                    tracing::info!(count = swept.len(), "Swept finished jobs");
                }
                let _ = reply.send(swept);
            }
        }
    }

    /// 先写入记录再入队，worker 领取时记录一定存在
    async fn admit(&self, request: UploadRequest) -> JobId {
        let request = Arc::new(request);
        let job_id = request.job_id;

        self.store.insert(UploadJob::new(&request)).await;
        self.queue.enqueue(request.clone());
        tracing::info!(%job_id, name = %request.name, pending = self.queue.pending(), "Upload queued");

        job_id
    }

    async fn cancel(&self, job_id: JobId) -> Result<bool> {
        let (status, token) = self.store
            .cancel_handle(&job_id)
            .await
            .ok_or(UploadError::JobNotFound(job_id))?;

        match token {
            Some(token) if !token.is_cancelled() => {
                tracing::info!(%job_id, %status, "Cancelling upload");
                token.cancel();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn request_status_check(&self, job_id: JobId, task_id: String) -> Result<()> {
        if !self.store.contains(&job_id).await {
            return Err(UploadError::JobNotFound(job_id));
        }

        self.check_tx
            .send(StatusCheckRequest { job_id, task_id })
            .map_err(|_| UploadError::EngineShutdown)
    }
}
