use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{mpsc, Mutex};
use crate::store::UploadRequest;

/// 队列里的一项：提交参数的引用
pub type QueueEntry = Arc<UploadRequest>;

/// 无界 FIFO 队列，多个 worker 竞争读取队头
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<QueueEntry>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<QueueEntry>>>,
    pending: Arc<AtomicUsize>,
}

impl JobQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 追加到队尾，永不阻塞
    pub fn enqueue(&self, entry: QueueEntry) {
        // 接收端和发送端在同一个结构里，发送不会失败
        self.pending.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send(entry);
    }

    /// 等待并取出队头
    pub async fn dequeue(&self) -> Option<QueueEntry> {
        let mut rx = self.rx.lock().await;
        let entry = rx.recv().await?;
        self.pending.fetch_sub(1, Ordering::SeqCst);

        Some(entry)
    }

    /// 还未被领取的任务数
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
