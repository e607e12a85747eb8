use std::sync::Arc;
use tokio::task::JoinHandle;
use crate::errors::UploadError;
use crate::progress::{transfer_channel, TransferEvents};
use crate::store::{JobStore, Transition};
use crate::traits::{Notifier, RemoteProcessor, TransferExecutor};
use crate::types::{JobId, Notice, NoticeKind, TransferEvent};
use super::queue::QueueEntry;

/// 单个任务的上传流程：传输 -> 启动远端处理
#[derive(Clone)]
pub(crate) struct Uploader {
    pub(crate) store: JobStore,
    pub(crate) executor: Arc<dyn TransferExecutor>,
    pub(crate) processor: Arc<dyn RemoteProcessor>,
    pub(crate) notifier: Arc<dyn Notifier>,
}

impl Uploader {
    /// 调用前任务必须已经是 `fetching`
    pub(crate) async fn run(self, entry: QueueEntry) {
        let id = entry.job_id;

        if entry.cancel.is_cancelled() {
            self.fail_transfer(id, UploadError::Cancelled.to_string()).await;
            return;
        }

        let (events, transfer) = self.start_transfer(&entry);
        self.store.apply(Transition::TransferStarted { id }).await;

        match self.drain(id, events, transfer).await {
            Ok(()) => {
                self.store.apply(Transition::TransferFinished { id }).await;
                tracing::info!(job_id = %id, name = %entry.name, "Upload finished");
                self.start_processing(id, &entry.processing_key).await;
            }
            Err(error) => self.fail_transfer(id, error).await,
        }
    }

    /// 为任务打开独立的传输通道，传输在单独的 task 中执行
    fn start_transfer(&self, entry: &QueueEntry) -> (TransferEvents, JoinHandle<()>) {
        let (emitter, events) = transfer_channel();
        let executor = self.executor.clone();
        let cancel = entry.cancel.clone();
        let url = entry.url.clone();
        let payload = entry.payload.clone();

        let transfer = tokio::spawn(async move {
            let result = tokio::select! {
                result = executor.transfer(&url, payload, emitter.clone()) => result,
                _ = cancel.cancelled() => Err(UploadError::Cancelled),
            };

            match result {
                Ok(()) => emitter.finish(),
                Err(err) => emitter.fail(err.to_string()),
            }
        });

        (events, transfer)
    }

    /// 按顺序消费事件直到终止事件
    async fn drain(&self, id: JobId, mut events: TransferEvents, transfer: JoinHandle<()>) -> Result<(), String> {
        loop {
            match events.next().await {
                Some(TransferEvent::Progress { loaded, total }) => {
                    self.store.apply(Transition::Progress { id, loaded, total }).await;
                }
                Some(TransferEvent::Finished) => return Ok(()),
                Some(TransferEvent::Failure { error }) => return Err(error),
                None => {
                    // 发送端全部关闭却没有终止事件，只可能是传输 task 异常退出
                    return Err(match transfer.await {
                        Err(err) => format!("Transfer task panicked: {}", err),
                        Ok(()) => "Transfer ended without a result".to_string(),
                    });
                }
            }
        }
    }

    async fn start_processing(&self, id: JobId, processing_key: &str) {
        match self.processor.start_processing(processing_key).await {
            Ok(task) => {
                tracing::info!(job_id = %id, task_id = %task.task_id, "Remote processing started");
                self.store
                    .apply(Transition::ProcessingStarted { id, task_id: task.task_id })
                    .await;
            }
            Err(err) => {
                tracing::warn!(job_id = %id, error = %err, "Failed to start remote processing");
                self.store
                    .apply(Transition::ProcessingKickoffFailed { id, error: err.to_string() })
                    .await;
                self.notifier.notify(Notice::new(
                    NoticeKind::ProcessingKickoff,
                    Some(id),
                    format!("Unable to start processing: {}", err),
                ));
            }
        }
    }

    async fn fail_transfer(&self, id: JobId, error: String) {
        tracing::warn!(job_id = %id, %error, "Upload failed");
        self.store
            .apply(Transition::TransferFailed { id, error: error.clone() })
            .await;
        self.notifier.notify(Notice::new(NoticeKind::Transfer, Some(id), error));
    }
}
