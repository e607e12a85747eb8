use std::pin::Pin;
use std::task::{Context, Poll};
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use crate::progress::ProgressEmitter;

pin_project! {
    /// 包装请求体，每读出一块就上报一次累计进度
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        emitter: ProgressEmitter,
        bytes_uploaded: u64,
        total_bytes: u64,
    }
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, emitter: ProgressEmitter, total_bytes: u64) -> Self {
        // 立即发送初始进度
        emitter.emit(0, total_bytes);

        Self {
            inner,
            emitter,
            bytes_uploaded: 0,
            total_bytes,
        }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>>,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if !chunk.is_empty() {
                    *this.bytes_uploaded += chunk.len() as u64;
                    this.emitter.emit(*this.bytes_uploaded, *this.total_bytes);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}

/// 把整块数据切成固定大小的流
pub fn chunked(payload: Bytes, chunk_size: usize) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
    let chunk_size = chunk_size.max(1);
    let chunks: Vec<std::io::Result<Bytes>> = (0..payload.len())
        .step_by(chunk_size)
        .map(|start| Ok(payload.slice(start..(start + chunk_size).min(payload.len()))))
        .collect();

    futures_util::stream::iter(chunks)
}
