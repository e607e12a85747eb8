use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use crate::store::{Applied, JobStore, Transition};
use crate::types::{JobId, Notice, NoticeKind, UploadStatus};
use super::queue::{JobQueue, QueueEntry};
use super::uploader::Uploader;

/// 启动 `count` 个 worker，每个都从同一个队列里取任务
pub(crate) fn spawn_workers(
    count: usize,
    queue: JobQueue,
    uploader: Uploader,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|index| {
            let worker = UploadWorker {
                index,
                queue: queue.clone(),
                uploader: uploader.clone(),
                shutdown: shutdown.clone(),
            };
            tokio::spawn(worker.run())
        })
        .collect()
}

pub(crate) struct UploadWorker {
    index: usize,
    queue: JobQueue,
    uploader: Uploader,
    shutdown: CancellationToken,
}

impl UploadWorker {
    pub(crate) async fn run(self) {
        tracing::debug!(worker = self.index, "Upload worker started");

        loop {
            let entry = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                entry = self.queue.dequeue() => match entry {
                    Some(entry) => entry,
                    None => break,
                },
            };

            self.process(entry).await;
        }

        tracing::debug!(worker = self.index, "Upload worker stopped");
    }

    async fn process(&self, entry: QueueEntry) {
        let id = entry.job_id;
        let store = &self.uploader.store;

        if !store.apply(Transition::Claim { id }).await.is_changed() {
            tracing::debug!(worker = self.index, job_id = %id, "Job no longer claimable, skipped");
            return;
        }
        tracing::debug!(worker = self.index, job_id = %id, "Job claimed");

        // 单独的 task 中执行，panic 不会带走 worker
        let mut handle = tokio::spawn(self.uploader.clone().run(entry.clone()));
        let result = tokio::select! {
            result = &mut handle => result,
            _ = self.shutdown.cancelled() => {
                entry.cancel.cancel();
                handle.await
            }
        };

        if let Err(err) = result {
            self.handle_fault(id, format!("Upload task panicked: {}", err)).await;
        }
    }

    /// 把未捕获的异常转换成对应阶段的失败状态
    async fn handle_fault(&self, id: JobId, error: String) {
        tracing::error!(worker = self.index, job_id = %id, %error, "Upload task crashed");
        let store = &self.uploader.store;

        let applied = store
            .apply(Transition::TransferFailed { id, error: error.clone() })
            .await;
        if applied == Applied::Ignored {
            if let Some(job) = store.get(&id).await {
                if job.status == UploadStatus::Finished {
                    store.apply(Transition::ProcessingKickoffFailed { id, error: error.clone() }).await;
                }
            }
        }

        self.uploader
            .notifier
            .notify(Notice::new(NoticeKind::Transfer, Some(id), error));
    }
}
