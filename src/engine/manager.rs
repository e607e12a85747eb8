use std::sync::Arc;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use crate::config::EngineConfig;
use crate::errors::{Result, UploadError};
use crate::store::{JobStore, ProgressView, UploadJob, UploadRequest};
use crate::traits::{
    Notifier, RemoteProcessor, StageRequester, TaskStatusChecker, TracingNotifier, TransferExecutor,
};
use crate::types::{EngineEvent, JobId, Notice, NoticeKind};
use super::manager_worker::{AdmissionLoop, EngineCommand};
use super::poller::StatusPoller;
use super::queue::JobQueue;
use super::uploader::Uploader;
use super::worker::spawn_workers;

/// 上传引擎入口
#[derive(Clone)]
pub struct UploadEngine {
    command_tx: mpsc::UnboundedSender<EngineCommand>,
    event_tx: broadcast::Sender<EngineEvent>,
    store: JobStore,
    queue: JobQueue,
    stager: Option<Arc<dyn StageRequester>>,
    notifier: Arc<dyn Notifier>,
}

/// 上传引擎句柄 - 包含引擎和所有后台 task
pub struct EngineHandle {
    pub engine: UploadEngine,
    shutdown: CancellationToken,
    admission_handle: JoinHandle<()>,
    worker_handles: Vec<JoinHandle<()>>,
    poller_handle: JoinHandle<()>,
}

impl EngineHandle {
    /// 停止接收命令、worker 和轮询，正在传输的任务会被取消并标记为 `failed`
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.cancel();

        self.admission_handle
            .await
            .map_err(|err| UploadError::internal_error(format!("Admission loop panic: {}", err)))?;
        for handle in self.worker_handles {
            handle
                .await
                .map_err(|err| UploadError::internal_error(format!("Worker panic: {}", err)))?;
        }
        self.poller_handle
            .await
            .map_err(|err| UploadError::internal_error(format!("Poller panic: {}", err)))?;

        tracing::info!("Upload engine stopped");
        Ok(())
    }
}

impl std::ops::Deref for EngineHandle {
    type Target = UploadEngine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

impl UploadEngine {
    pub fn builder() -> UploadEngineBuilder {
        UploadEngineBuilder::default()
    }

    /// 提交上传任务，立即返回任务 ID
    pub async fn submit(
        &self,
        name: impl Into<String>,
        url: impl Into<String>,
        processing_key: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<JobId> {
        let request = UploadRequest::new(name, url, processing_key, payload.into());
        if request.url.is_empty() {
            return Err(UploadError::InvalidRequest("Upload url is empty".to_string()));
        }
        if request.processing_key.is_empty() {
            return Err(UploadError::InvalidRequest("Processing key is empty".to_string()));
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(EngineCommand::Submit { request, reply: reply_tx })
            .map_err(|_| UploadError::EngineShutdown)?;

        reply_rx.await.map_err(|_| UploadError::EngineShutdown)
    }

    /// 先获取上传地址再提交，失败时不会创建任务
    pub async fn stage_and_submit(&self, name: impl Into<String>, payload: impl Into<Bytes>) -> Result<JobId> {
        let name = name.into();
        let stager = self.stager
            .as_ref()
            .ok_or_else(|| UploadError::Stage("No stage requester configured".to_string()))?;

        let staged = match stager.stage().await {
            Ok(staged) => staged,
            Err(err) => {
                tracing::warn!(%name, error = %err, "Stage request failed");
                self.notifier.notify(Notice::new(
                    NoticeKind::Admission,
                    None,
                    format!("Unable to stage {}: {}", name, err),
                ));
                return Err(match err {
                    UploadError::Stage(message) => UploadError::Stage(message),
                    other => UploadError::Stage(other.to_string()),
                });
            }
        };

        self.submit(name, staged.url, staged.key, payload).await
    }

    /// 取消任务。任务已离开传输阶段时返回 `Ok(false)`
    ///
    /// 排队中的任务只会被标记，状态保持 `queued`，直到某个 worker 领取它时才进入
    /// `failed`。所有 worker 都忙时这可能要等较长时间。
    ///
    /// 引擎关闭后返回 `Err(UploadError::EngineShutdown)`，仍在排队的任务不会再被领取。
    pub async fn cancel(&self, job_id: JobId) -> Result<bool> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(EngineCommand::Cancel { job_id, reply: reply_tx })
            .map_err(|_| UploadError::EngineShutdown)?;

        reply_rx.await.map_err(|_| UploadError::EngineShutdown)?
    }

    /// 在自动轮询之外手动查询一次处理状态
    pub async fn request_status_check(&self, job_id: JobId, task_id: impl Into<String>) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(EngineCommand::RequestStatusCheck {
                job_id,
                task_id: task_id.into(),
                reply: reply_tx,
            })
            .map_err(|_| UploadError::EngineShutdown)?;

        reply_rx.await.map_err(|_| UploadError::EngineShutdown)?
    }

    /// 清除所有已结束的任务
    pub async fn sweep_terminal(&self) -> Result<Vec<JobId>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(EngineCommand::SweepTerminal { reply: reply_tx })
            .map_err(|_| UploadError::EngineShutdown)?;

        reply_rx.await.map_err(|_| UploadError::EngineShutdown)
    }

    pub async fn get_job(&self, job_id: JobId) -> Option<UploadJob> {
        self.store.get(&job_id).await
    }

    pub async fn list_jobs(&self) -> Vec<UploadJob> {
        self.store.list().await
    }

    pub async fn list_progress_views(&self) -> Vec<ProgressView> {
        self.store.progress_views().await
    }

    /// 队列中还未被 worker 领取的任务数
    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    /// 订阅事件
    ///
    /// 注意：
    /// - 如果接收速度跟不上发送速度，可能会丢失事件（lagged error）
    /// - 任务的最新状态始终以 `get_job` 为准
    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredEventReceiver<F>
    where
        F: Fn(&EngineEvent) -> bool,
    {
        FilteredEventReceiver {
            receiver: self.event_tx.subscribe(),
            filter,
        }
    }
}

/// 过滤的事件接收器
pub struct FilteredEventReceiver<F> {
    receiver: broadcast::Receiver<EngineEvent>,
    filter: F,
}

impl<F> FilteredEventReceiver<F>
where
    F: Fn(&EngineEvent) -> bool,
{
    pub async fn recv(&mut self) -> Result<EngineEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if (self.filter)(&event) {
                return Ok(event);
            }
        }
    }
}

#[derive(Default)]
pub struct UploadEngineBuilder {
    config: EngineConfig,
    stager: Option<Arc<dyn StageRequester>>,
    executor: Option<Arc<dyn TransferExecutor>>,
    processor: Option<Arc<dyn RemoteProcessor>>,
    checker: Option<Arc<dyn TaskStatusChecker>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl UploadEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn stager(mut self, stager: Arc<dyn StageRequester>) -> Self {
        self.stager = Some(stager);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn TransferExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn processor(mut self, processor: Arc<dyn RemoteProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn checker(mut self, checker: Arc<dyn TaskStatusChecker>) -> Self {
        self.checker = Some(checker);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// 一个对象同时实现了全部接口时使用
    pub fn api<T>(self, api: Arc<T>) -> Self
    where
        T: StageRequester + TransferExecutor + RemoteProcessor + TaskStatusChecker + 'static,
    {
        self.stager(api.clone())
            .executor(api.clone())
            .processor(api.clone())
            .checker(api)
    }

    /// 启动 worker、轮询和命令循环，必须在 tokio runtime 中调用
    pub fn start(self) -> Result<EngineHandle> {
        self.config.validate()?;
        let executor = self.executor
            .ok_or_else(|| UploadError::Config("Transfer executor is required".to_string()))?;
        let processor = self.processor
            .ok_or_else(|| UploadError::Config("Remote processor is required".to_string()))?;
        let checker = self.checker
            .ok_or_else(|| UploadError::Config("Task status checker is required".to_string()))?;
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(TracingNotifier));
        let config = Arc::new(self.config);

        let (event_tx, _) = broadcast::channel(config.event_capacity);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (check_tx, check_rx) = mpsc::unbounded_channel();
        let store = JobStore::new(event_tx.clone());
        let queue = JobQueue::new();
        let shutdown = CancellationToken::new();

        let uploader = Uploader {
            store: store.clone(),
            executor,
            processor,
            notifier: notifier.clone(),
        };
        let worker_handles = spawn_workers(
            config.max_concurrent_uploads,
            queue.clone(),
            uploader,
            shutdown.clone(),
        );

        let poller = StatusPoller {
            store: store.clone(),
            checker,
            notifier: notifier.clone(),
            config: config.clone(),
        };
        let poller_handle = tokio::spawn(poller.run(check_rx, shutdown.clone()));

        let admission = AdmissionLoop {
            store: store.clone(),
            queue: queue.clone(),
            check_tx,
        };
        let admission_handle = tokio::spawn(admission.run(command_rx, shutdown.clone()));

        tracing::info!(workers = config.max_concurrent_uploads, "Upload engine started");

        let engine = UploadEngine {
            command_tx,
            event_tx,
            store,
            queue,
            stager: self.stager,
            notifier,
        };

        Ok(EngineHandle {
            engine,
            shutdown,
            admission_handle,
            worker_handles,
            poller_handle,
        })
    }
}
