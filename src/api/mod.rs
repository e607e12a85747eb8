//! 处理流水线服务的 HTTP 实现

mod client;
mod progress_stream;

pub use client::HttpApi;
pub use progress_stream::{chunked, ProgressStream};
