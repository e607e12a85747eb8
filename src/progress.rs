//! 单个任务的传输通道，每次传输新建，读到终止事件后丢弃

use tokio::sync::mpsc;
use crate::types::TransferEvent;

pub fn transfer_channel() -> (ProgressEmitter, TransferEvents) {
    let (tx, rx) = mpsc::unbounded_channel();

    (ProgressEmitter { tx }, TransferEvents { rx, done: false })
}

#[derive(Debug, Clone)]
pub struct ProgressEmitter {
    tx: mpsc::UnboundedSender<TransferEvent>,
}

impl ProgressEmitter {
    /// 上报进度，接收端已关闭时静默丢弃
    pub fn emit(&self, loaded: u64, total: u64) {
        let _ = self.tx.send(TransferEvent::Progress { loaded, total });
    }

    pub(crate) fn finish(&self) {
        let _ = self.tx.send(TransferEvent::Finished);
    }

    pub(crate) fn fail(&self, error: impl Into<String>) {
        let _ = self.tx.send(TransferEvent::Failure { error: error.into() });
    }
}

#[derive(Debug)]
pub struct TransferEvents {
    rx: mpsc::UnboundedReceiver<TransferEvent>,
    done: bool,
}

impl TransferEvents {
    /// 下一个事件；终止事件之后以及发送端全部关闭后返回 `None`
    pub async fn next(&mut self) -> Option<TransferEvent> {
        if self.done {
            return None;
        }

        let event = self.rx.recv().await?;
        if event.is_terminal() {
            self.done = true;
            self.rx.close();
        }

        Some(event)
    }
}
