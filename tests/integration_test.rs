use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use bytes::Bytes;
use tokio::sync::Semaphore;
use upstage::{
    EngineConfig, EngineEvent, EngineHandle, JobId, Notice, NoticeKind, Notifier, ProcessingTask,
    ProgressEmitter, RemoteProcessor, Result, StageRequester, StagedAsset, StatusReport,
    TaskStatusChecker, TransferExecutor, TransferProgress, UploadEngine, UploadError, UploadStatus,
};

/// 模拟的流水线服务，行为由上传地址决定：
/// - 包含 `gate`：先上报 0%，等待放行
/// - 包含 `fail`：上报 50% 后失败
/// - 包含 `panic`：直接 panic
/// - 其他：上报 50% 后成功
///
/// 处理 key 以 `bad` 开头时启动处理失败，以 `hold` 开头时等待 `kickoff_gate` 放行。
struct MockApi {
    active: AtomicUsize,
    max_active: AtomicUsize,
    gate: Semaphore,
    kickoff_gate: Semaphore,
    process_calls: Mutex<Vec<String>>,
    check_calls: AtomicUsize,
    check_reply: Mutex<std::result::Result<String, String>>,
    stage_fails: AtomicBool,
}

impl MockApi {
    fn new() -> Self {
        Self {
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            gate: Semaphore::new(0),
            kickoff_gate: Semaphore::new(0),
            process_calls: Mutex::new(Vec::new()),
            check_calls: AtomicUsize::new(0),
            check_reply: Mutex::new(Ok("running".to_string())),
            stage_fails: AtomicBool::new(false),
        }
    }

    fn reply_with(&self, reply: std::result::Result<&str, &str>) {
        *self.check_reply.lock().unwrap() = reply.map(String::from).map_err(String::from);
    }

    fn process_calls(&self) -> Vec<String> {
        self.process_calls.lock().unwrap().clone()
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl StageRequester for MockApi {
    async fn stage(&self) -> Result<StagedAsset> {
        if self.stage_fails.load(Ordering::SeqCst) {
            return Err(UploadError::server_error(503, "stage unavailable"));
        }

        Ok(StagedAsset {
            url: format!("https://bucket.example.com/{}", JobId::new()),
            key: format!("key-{}", JobId::new()),
        })
    }
}

#[async_trait::async_trait]
impl TransferExecutor for MockApi {
    async fn transfer(&self, url: &str, _payload: Bytes, progress: ProgressEmitter) -> Result<()> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        if url.contains("panic") {
            panic!("transfer exploded");
        }

        if url.contains("gate") {
            progress.emit(0, 100);
            self.gate
                .acquire()
                .await
                .map_err(|err| UploadError::internal_error(err.to_string()))?
                .forget();
        }

        progress.emit(50, 100);
        tokio::task::yield_now().await;

        if url.contains("fail") {
            return Err(UploadError::transfer_error("connection reset"));
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl RemoteProcessor for MockApi {
    async fn start_processing(&self, key: &str) -> Result<ProcessingTask> {
        self.process_calls.lock().unwrap().push(key.to_string());

        if key.starts_with("bad") {
            return Err(UploadError::Processing("pipeline unavailable".to_string()));
        }

        if key.starts_with("hold") {
            self.kickoff_gate
                .acquire()
                .await
                .map_err(|err| UploadError::internal_error(err.to_string()))?
                .forget();
        }

        Ok(ProcessingTask { task_id: format!("task-{}", key) })
    }
}

#[async_trait::async_trait]
impl TaskStatusChecker for MockApi {
    async fn check_status(&self, _task_id: &str) -> Result<StatusReport> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);

        let reply = self.check_reply.lock().unwrap().clone();
        match reply {
            Ok(status) => Ok(StatusReport { status: Some(status), error: None }),
            Err(message) => Err(UploadError::status_check_error(message)),
        }
    }
}

#[derive(Default)]
struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    fn count(&self, kind: NoticeKind) -> usize {
        self.notices.lock().unwrap().iter().filter(|n| n.kind == kind).count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

const NEVER: Duration = Duration::from_secs(3600);

fn start_engine(
    workers: usize,
    poll_interval: Duration,
    api: Arc<MockApi>,
    notifier: Arc<RecordingNotifier>,
) -> EngineHandle {
    let config = EngineConfig {
        max_concurrent_uploads: workers,
        poll_interval,
        ..Default::default()
    };

    UploadEngine::builder()
        .config(config)
        .api(api)
        .notifier(notifier)
        .start()
        .unwrap()
}

async fn wait_for_status(engine: &UploadEngine, id: JobId, status: UploadStatus) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if engine.get_job(id).await.map(|job| job.status) == Some(status) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    let current = engine.get_job(id).await.map(|job| job.status);
    assert!(reached.is_ok(), "job {id} never reached {status}, currently {current:?}");
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    assert!(reached.is_ok(), "condition never reached");
}

#[tokio::test(start_paused = true)]
async fn test_progress_then_finished_starts_processing_once() {
    let api = Arc::new(MockApi::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let handle = start_engine(2, NEVER, api.clone(), notifier.clone());
    let mut events = handle.subscribe_events();

    let id = handle
        .submit("cat.jpeg", "https://bucket/ok", "key-cat", Bytes::from_static(b"meow"))
        .await
        .unwrap();
    wait_for_status(&handle, id, UploadStatus::ProcessingStarted).await;

    let job = handle.get_job(id).await.unwrap();
    assert_eq!(job.task_id.as_deref(), Some("task-key-cat"));
    assert_eq!(job.progress, Some(TransferProgress { loaded: 100, total: 100 }));
    assert_eq!(api.process_calls(), vec!["key-cat".to_string()]);

    let mut transitions = Vec::new();
    let mut saw_progress = false;
    while let Ok(event) = events.try_recv() {
        match event {
            EngineEvent::StatusChanged { job_id, from, to } if job_id == id => transitions.push((from, to)),
            EngineEvent::Progress { job_id, loaded: 50, total: 100 } if job_id == id => saw_progress = true,
            _ => {}
        }
    }

    use UploadStatus::*;
    assert_eq!(transitions, vec![
        (Queued, Fetching),
        (Fetching, Uploading),
        (Uploading, Finished),
        (Finished, ProcessingStarted),
    ]);
    assert!(saw_progress);
    assert_eq!(notifier.notices.lock().unwrap().len(), 0);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_transfer_failure_skips_processing() {
    let api = Arc::new(MockApi::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let handle = start_engine(2, NEVER, api.clone(), notifier.clone());

    let id = handle
        .submit("broken.jpeg", "https://bucket/fail", "key-broken", Bytes::new())
        .await
        .unwrap();
    wait_for_status(&handle, id, UploadStatus::Failed).await;

    let job = handle.get_job(id).await.unwrap();
    assert!(job.error.unwrap().contains("connection reset"));
    assert!(api.process_calls().is_empty());
    assert_eq!(notifier.count(NoticeKind::Transfer), 1);

    let views = handle.list_progress_views().await;
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].status, UploadStatus::Failed);
    assert_eq!(views[0].upload_percentage, Some(50));

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_processing_kickoff_failure() {
    let api = Arc::new(MockApi::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let handle = start_engine(1, NEVER, api.clone(), notifier.clone());

    let id = handle
        .submit("a.jpeg", "https://bucket/ok", "bad-key", Bytes::new())
        .await
        .unwrap();
    wait_for_status(&handle, id, UploadStatus::ProcessingFailed).await;

    let job = handle.get_job(id).await.unwrap();
    assert_eq!(job.task_id, None);
    assert_eq!(api.process_calls().len(), 1);
    assert_eq!(notifier.count(NoticeKind::ProcessingKickoff), 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_is_bounded_by_worker_count() {
    let api = Arc::new(MockApi::new());
    let handle = start_engine(3, NEVER, api.clone(), Arc::new(RecordingNotifier::default()));

    let mut ids = Vec::new();
    for i in 0..10 {
        let id = handle
            .submit(format!("{i}.jpeg"), format!("https://bucket/gate/{i}"), format!("key-{i}"), Bytes::new())
            .await
            .unwrap();
        ids.push(id);
    }

    wait_until(|| api.active.load(Ordering::SeqCst) == 3).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(api.active.load(Ordering::SeqCst), 3);

    let jobs = handle.list_jobs().await;
    let transferring = jobs.iter().filter(|job| job.status.is_transferring()).count();
    let queued = jobs.iter().filter(|job| job.status == UploadStatus::Queued).count();
    assert_eq!(transferring, 3);
    assert_eq!(queued, 7);
    assert_eq!(handle.pending(), 7);

    api.gate.add_permits(10);
    for id in &ids {
        wait_for_status(&handle, *id, UploadStatus::ProcessingStarted).await;
    }
    assert_eq!(api.max_active.load(Ordering::SeqCst), 3);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_burst_submissions_are_never_lost() {
    let api = Arc::new(MockApi::new());
    let handle = start_engine(2, NEVER, api.clone(), Arc::new(RecordingNotifier::default()));

    let mut ids = Vec::new();
    for i in 0..50 {
        ids.push(
            handle
                .submit(format!("{i}.jpeg"), format!("https://bucket/gate/{i}"), format!("key-{i}"), Bytes::new())
                .await
                .unwrap(),
        );
    }

    let jobs = handle.list_jobs().await;
    assert_eq!(jobs.len(), 50);
    for id in &ids {
        let job = handle.get_job(*id).await.unwrap();
        assert!(matches!(job.status, UploadStatus::Queued | UploadStatus::Fetching | UploadStatus::Uploading));
    }

    api.gate.add_permits(50);
    for id in &ids {
        wait_for_status(&handle, *id, UploadStatus::ProcessingStarted).await;
    }

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_poller_completes_processing() {
    let api = Arc::new(MockApi::new());
    api.reply_with(Ok("done"));
    let handle = start_engine(2, Duration::from_millis(20), api.clone(), Arc::new(RecordingNotifier::default()));

    let id = handle
        .submit("a.jpeg", "https://bucket/ok", "key-a", Bytes::new())
        .await
        .unwrap();
    wait_for_status(&handle, id, UploadStatus::ProcessingFinished).await;

    let checks = api.check_calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // 终态后不再查询
    assert_eq!(api.check_calls.load(Ordering::SeqCst), checks);
    let job = handle.get_job(id).await.unwrap();
    assert_eq!(job.processing.unwrap().status.as_deref(), Some("done"));

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_poller_moves_through_processing() {
    let api = Arc::new(MockApi::new());
    let handle = start_engine(1, Duration::from_millis(20), api.clone(), Arc::new(RecordingNotifier::default()));

    let id = handle
        .submit("a.jpeg", "https://bucket/ok", "key-a", Bytes::new())
        .await
        .unwrap();
    wait_for_status(&handle, id, UploadStatus::Processing).await;

    api.reply_with(Ok("failed"));
    wait_for_status(&handle, id, UploadStatus::ProcessingFailed).await;

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_status_check_failure_keeps_status() {
    let api = Arc::new(MockApi::new());
    api.reply_with(Err("gateway timeout"));
    let notifier = Arc::new(RecordingNotifier::default());
    let handle = start_engine(1, Duration::from_millis(20), api.clone(), notifier.clone());

    let id = handle
        .submit("a.jpeg", "https://bucket/ok", "key-a", Bytes::new())
        .await
        .unwrap();
    wait_for_status(&handle, id, UploadStatus::ProcessingStarted).await;

    wait_until(|| notifier.count(NoticeKind::StatusCheck) >= 2).await;
    assert_eq!(handle.get_job(id).await.unwrap().status, UploadStatus::ProcessingStarted);

    // 恢复后下一次轮询照常推进
    api.reply_with(Ok("done"));
    wait_for_status(&handle, id, UploadStatus::ProcessingFinished).await;

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_manual_status_check() {
    let api = Arc::new(MockApi::new());
    api.reply_with(Ok("done"));
    let handle = start_engine(1, NEVER, api.clone(), Arc::new(RecordingNotifier::default()));

    let id = handle
        .submit("a.jpeg", "https://bucket/ok", "key-a", Bytes::new())
        .await
        .unwrap();
    wait_for_status(&handle, id, UploadStatus::ProcessingStarted).await;

    handle.request_status_check(id, "task-key-a").await.unwrap();
    wait_for_status(&handle, id, UploadStatus::ProcessingFinished).await;

    let missing = handle.request_status_check(JobId::new(), "task-x").await;
    assert!(matches!(missing, Err(UploadError::JobNotFound(_))));

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cancel_inflight_upload() {
    let api = Arc::new(MockApi::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let handle = start_engine(1, NEVER, api.clone(), notifier.clone());

    let inflight = handle
        .submit("a.jpeg", "https://bucket/gate/a", "key-a", Bytes::new())
        .await
        .unwrap();
    let queued = handle
        .submit("b.jpeg", "https://bucket/gate/b", "key-b", Bytes::new())
        .await
        .unwrap();
    wait_for_status(&handle, inflight, UploadStatus::Uploading).await;

    assert!(handle.cancel(inflight).await.unwrap());
    wait_for_status(&handle, inflight, UploadStatus::Failed).await;
    let job = handle.get_job(inflight).await.unwrap();
    assert_eq!(job.error.as_deref(), Some("Upload was cancelled"));

    // 排队中的任务被取消后，worker 领取时直接失败
    assert!(handle.cancel(queued).await.unwrap());
    wait_for_status(&handle, queued, UploadStatus::Failed).await;

    // 终态任务取消是 no-op
    assert!(!handle.cancel(inflight).await.unwrap());
    assert!(matches!(handle.cancel(JobId::new()).await, Err(UploadError::JobNotFound(_))));
    assert!(api.process_calls().is_empty());
    assert_eq!(notifier.count(NoticeKind::Transfer), 2);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_queued_job_fails_when_claimed() {
    let api = Arc::new(MockApi::new());
    let handle = start_engine(1, NEVER, api.clone(), Arc::new(RecordingNotifier::default()));

    let busy = handle.submit("a", "https://bucket/gate/a", "key-a", Bytes::new()).await.unwrap();
    let queued = handle.submit("b", "https://bucket/ok", "key-b", Bytes::new()).await.unwrap();
    wait_for_status(&handle, busy, UploadStatus::Uploading).await;

    assert!(handle.cancel(queued).await.unwrap());
    tokio::time::sleep(Duration::from_millis(100)).await;

    // worker 还在忙，被取消的任务保持排队
    assert_eq!(handle.get_job(queued).await.unwrap().status, UploadStatus::Queued);

    api.gate.add_permits(1);
    wait_for_status(&handle, busy, UploadStatus::ProcessingStarted).await;
    wait_for_status(&handle, queued, UploadStatus::Failed).await;
    assert_eq!(api.process_calls(), vec!["key-a".to_string()]);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_panicking_transfer_does_not_kill_worker() {
    let api = Arc::new(MockApi::new());
    let handle = start_engine(1, NEVER, api.clone(), Arc::new(RecordingNotifier::default()));

    let crashed = handle
        .submit("a.jpeg", "https://bucket/panic", "key-a", Bytes::new())
        .await
        .unwrap();
    let healthy = handle
        .submit("b.jpeg", "https://bucket/ok", "key-b", Bytes::new())
        .await
        .unwrap();

    wait_for_status(&handle, crashed, UploadStatus::Failed).await;
    wait_for_status(&handle, healthy, UploadStatus::ProcessingStarted).await;
    assert!(handle.get_job(crashed).await.unwrap().error.unwrap().contains("panicked"));

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stage_and_submit() {
    let api = Arc::new(MockApi::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let handle = start_engine(1, NEVER, api.clone(), notifier.clone());

    let id = handle.stage_and_submit("a.jpeg", Bytes::from_static(b"data")).await.unwrap();
    wait_for_status(&handle, id, UploadStatus::ProcessingStarted).await;

    api.stage_fails.store(true, Ordering::SeqCst);
    let result = handle.stage_and_submit("b.jpeg", Bytes::new()).await;
    assert!(matches!(result, Err(UploadError::Stage(_))));
    assert_eq!(handle.list_jobs().await.len(), 1);
    assert_eq!(notifier.count(NoticeKind::Admission), 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_invalid_submission_rejected() {
    let api = Arc::new(MockApi::new());
    let handle = start_engine(1, NEVER, api, Arc::new(RecordingNotifier::default()));

    let result = handle.submit("a.jpeg", "", "key", Bytes::new()).await;
    assert!(matches!(result, Err(UploadError::InvalidRequest(_))));
    assert!(handle.list_jobs().await.is_empty());

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_sweep_terminal_keeps_active_jobs() {
    let api = Arc::new(MockApi::new());
    api.reply_with(Ok("done"));
    let handle = start_engine(2, Duration::from_millis(20), api.clone(), Arc::new(RecordingNotifier::default()));

    let finished = handle.submit("a", "https://bucket/ok", "key-a", Bytes::new()).await.unwrap();
    let failed = handle.submit("b", "https://bucket/fail", "key-b", Bytes::new()).await.unwrap();
    let waiting = handle.submit("c", "https://bucket/gate/c", "key-c", Bytes::new()).await.unwrap();

    wait_for_status(&handle, finished, UploadStatus::ProcessingFinished).await;
    wait_for_status(&handle, failed, UploadStatus::Failed).await;
    wait_for_status(&handle, waiting, UploadStatus::Uploading).await;

    let mut swept = handle.sweep_terminal().await.unwrap();
    swept.sort_by_key(|id| id.to_string());
    let mut expected = vec![finished, failed];
    expected.sort_by_key(|id| id.to_string());
    assert_eq!(swept, expected);

    let remaining = handle.list_jobs().await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, waiting);

    api.gate.add_permits(1);
    wait_for_status(&handle, waiting, UploadStatus::ProcessingFinished).await;

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_sweep_keeps_job_while_processing_starts() {
    let api = Arc::new(MockApi::new());
    api.reply_with(Ok("done"));
    let handle = start_engine(1, Duration::from_millis(20), api.clone(), Arc::new(RecordingNotifier::default()));

    let id = handle.submit("a", "https://bucket/ok", "hold-a", Bytes::new()).await.unwrap();
    wait_for_status(&handle, id, UploadStatus::Finished).await;
    wait_until(|| api.process_calls().len() == 1).await;

    // 远端处理正在启动，任务不能被清理
    let swept = handle.sweep_terminal().await.unwrap();
    assert!(swept.is_empty());
    assert_eq!(handle.get_job(id).await.unwrap().status, UploadStatus::Finished);

    api.kickoff_gate.add_permits(1);
    wait_for_status(&handle, id, UploadStatus::ProcessingFinished).await;
    assert!(api.check_calls.load(Ordering::SeqCst) >= 1);

    assert_eq!(handle.sweep_terminal().await.unwrap(), vec![id]);
    assert!(handle.get_job(id).await.is_none());

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_only_legal_transitions_are_observed() {
    let api = Arc::new(MockApi::new());
    api.reply_with(Ok("done"));
    let handle = start_engine(3, Duration::from_millis(10), api.clone(), Arc::new(RecordingNotifier::default()));
    let mut events = handle.subscribe_filtered(|event| matches!(event, EngineEvent::StatusChanged { .. }));

    let urls = ["ok", "fail", "panic", "ok", "fail", "ok"];
    let mut ids = Vec::new();
    for (i, url) in urls.iter().enumerate() {
        let key = if i == 3 { "bad-key".to_string() } else { format!("key-{i}") };
        ids.push(handle.submit(format!("{i}"), format!("https://bucket/{url}"), key, Bytes::new()).await.unwrap());
    }

    let mut finished = 0;
    while finished < ids.len() {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("no event")
            .unwrap();
        if let EngineEvent::StatusChanged { from, to, .. } = event {
            assert!(from.can_transition_to(to), "illegal transition {from} -> {to}");
            if to.is_terminal() {
                finished += 1;
            }
        }
    }

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_fails_inflight_uploads() {
    let api = Arc::new(MockApi::new());
    let handle = start_engine(1, NEVER, api.clone(), Arc::new(RecordingNotifier::default()));
    let engine = handle.engine.clone();

    let id = engine.submit("a", "https://bucket/gate/a", "key-a", Bytes::new()).await.unwrap();
    wait_for_status(&engine, id, UploadStatus::Uploading).await;

    handle.shutdown().await.unwrap();

    assert_eq!(engine.get_job(id).await.unwrap().status, UploadStatus::Failed);
    assert!(matches!(
        engine.submit("b", "https://bucket/ok", "key-b", Bytes::new()).await,
        Err(UploadError::EngineShutdown)
    ));
    assert!(matches!(engine.cancel(id).await, Err(UploadError::EngineShutdown)));
}

#[tokio::test]
async fn test_missing_collaborator_is_a_config_error() {
    let result = UploadEngine::builder().start();
    assert!(matches!(result, Err(UploadError::Config(_))));
}
